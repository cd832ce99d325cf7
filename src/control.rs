//! The Control Connection — protocol negotiation,
//! authentication gate, topology discovery, event subscription, and the
//! reconnection supervisor. This is the 60%-share core component; the
//! state-machine + loop-ownership shape is grounded on
//! `hermes_gateway::server::bootstrap`'s phase-by-phase lifecycle and its
//! `sleep_or_shutdown`-style cancellable timer loops.

use crate::error::{ConnectError, ControlError, NoHostsAvailable};
use crate::host::Host;
use crate::protocol::{
    Event, EventType, QueryResult, Request, Response, Row, StatusKind, TopologyKind,
    PROTOCOL_MISMATCH_CODE,
};
use crate::reactor::{Connection, IoReactor, RequestRunner, TimerHandle};
use crate::registry::Registry;
use crate::settings::Settings;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Closing,
    Closed,
}

enum CandidateOutcome {
    Connected(Arc<dyn Connection>),
    ProtocolMismatch,
    Failed(ControlError),
}

/// The single long-lived administrative connection ("Control connection").
/// Cheaply cloneable — every clone shares the same state.
#[derive(Clone)]
pub struct ControlConnection {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<Registry>,
    settings: Arc<Settings>,
    reactor: Arc<dyn IoReactor>,
    runner: Arc<dyn RequestRunner>,
    state: AsyncMutex<State>,
    connection: AsyncMutex<Option<Arc<dyn Connection>>>,
    reconnect_timer: std::sync::Mutex<Option<TimerHandle>>,
    /// Set by `close_async`; prevents any further timer installation or
    /// connection attempt even if a timer was already in flight — no new
    /// connection opens even if hosts come back up after close.
    closing: AtomicBool,
}

impl ControlConnection {
    /// `contact_points` seed the Registry's candidate IP list before any
    /// topology has been discovered, since the connect algorithm otherwise
    /// has nothing to dial on the very first attempt.
    /// Each seed is registered with placeholder attributes and replaced by
    /// its real ones the first time `system.local`/`system.peers` are read
    /// for that IP.
    pub fn new(
        contact_points: &[String],
        registry: Arc<Registry>,
        settings: Arc<Settings>,
        reactor: Arc<dyn IoReactor>,
        runner: Arc<dyn RequestRunner>,
    ) -> Self {
        registry.add_listener(settings.load_balancing_policy.clone());

        for ip in contact_points {
            registry.host_found(Host::seed(ip));
        }

        Self {
            inner: Arc::new(Inner {
                registry,
                settings,
                reactor,
                runner,
                state: AsyncMutex::new(State::Idle),
                connection: AsyncMutex::new(None),
                reconnect_timer: std::sync::Mutex::new(None),
                closing: AtomicBool::new(false),
            }),
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.inner.registry.clone()
    }

    /// Idempotent. On success, the state machine is *CONNECTED* with an
    /// active event subscription. On exhaustion of every candidate IP,
    /// fails with `NoHostsAvailable`.
    pub async fn connect_async(&self) -> Result<(), ConnectError> {
        {
            let mut state = self.inner.state.lock().await;
            if *state == State::Connected {
                return Ok(());
            }
            *state = State::Connecting;
        }

        match self.inner.run_connect_attempt().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let mut state = self.inner.state.lock().await;
                *state = State::Idle;
                Err(e.into())
            }
        }
    }

    /// Transitions to *CLOSING*, cancels any scheduled reconnect timer, and
    /// closes the bound connection if one exists. Never fails.
    pub async fn close_async(&self) {
        self.inner.closing.store(true, Ordering::Release);

        {
            let mut state = self.inner.state.lock().await;
            *state = State::Closing;
        }

        if let Some(handle) = self.inner.reconnect_timer.lock().unwrap().take() {
            handle.cancel();
        }

        let conn = self.inner.connection.lock().await.take();
        if let Some(conn) = conn {
            conn.close().await;
        }

        *self.inner.state.lock().await = State::Closed;
    }
}

impl Inner {
    /// Runs the six-step connect algorithm to completion:
    /// walks the candidate IP list at the current protocol version,
    /// restarting the whole walk one version lower on every protocol
    /// mismatch, until a candidate succeeds or every version from the
    /// configured maximum down to zero has been exhausted.
    async fn run_connect_attempt(self: &Arc<Self>) -> Result<(), NoHostsAvailable> {
        loop {
            let ips = self.registry.ips();
            let version = self.settings.protocol_version();
            let mut errors = HashMap::new();
            let mut mismatch_at: Option<u8> = None;

            for ip in &ips {
                match self.try_candidate(ip, version).await {
                    CandidateOutcome::Connected(conn) => {
                        self.finalize_connected(conn).await;
                        return Ok(());
                    }
                    CandidateOutcome::ProtocolMismatch => {
                        mismatch_at = Some(version);
                        break;
                    }
                    CandidateOutcome::Failed(e) => {
                        errors.insert(ip.clone(), e);
                    }
                }
            }

            let Some(old_version) = mismatch_at else {
                return Err(NoHostsAvailable { errors });
            };

            let new_version = old_version.saturating_sub(1);
            if new_version == 0 {
                return Err(NoHostsAvailable { errors });
            }

            self.settings.logger.warn(&format!(
                "could not connect using protocol version {old_version} (will try again with {new_version})"
            ));
            self.settings.set_protocol_version(new_version);
        }
    }

    /// One candidate at one protocol version: open → negotiate → startup/auth
    /// → discover → subscribe. Any failure along the way closes the
    /// connection and reports a per-candidate outcome; only a protocol
    /// mismatch on `OPTIONS` is distinguished from an ordinary failure,
    /// since it drives negotiation rather than candidate exhaustion.
    async fn try_candidate(&self, ip: &str, version: u8) -> CandidateOutcome {
        let conn = match self
            .reactor
            .connect(ip, self.settings.default_port, self.settings.connection_timeout)
            .await
        {
            Ok(conn) => conn,
            Err(e) => {
                metrics::counter!("cluster_control_connect_attempts_total", "outcome" => "transport_error")
                    .increment(1);
                return CandidateOutcome::Failed(e);
            }
        };

        match self.negotiate(&conn).await {
            Ok(()) => {}
            Err(NegotiationOutcome::Mismatch) => {
                conn.close().await;
                metrics::counter!("cluster_control_connect_attempts_total", "outcome" => "protocol_mismatch")
                    .increment(1);
                return CandidateOutcome::ProtocolMismatch;
            }
            Err(NegotiationOutcome::Failed(e)) => {
                conn.close().await;
                metrics::counter!("cluster_control_connect_attempts_total", "outcome" => "negotiation_failed")
                    .increment(1);
                return CandidateOutcome::Failed(e);
            }
        }

        if let Err(e) = self.startup(&conn, version).await {
            conn.close().await;
            metrics::counter!("cluster_control_connect_attempts_total", "outcome" => "startup_failed")
                .increment(1);
            return CandidateOutcome::Failed(e);
        }

        if let Err(e) = self.discover_and_subscribe(ip, &conn).await {
            conn.close().await;
            metrics::counter!("cluster_control_connect_attempts_total", "outcome" => "discovery_failed")
                .increment(1);
            return CandidateOutcome::Failed(e);
        }

        metrics::counter!("cluster_control_connect_attempts_total", "outcome" => "connected").increment(1);
        CandidateOutcome::Connected(conn)
    }

    async fn negotiate(&self, conn: &Arc<dyn Connection>) -> Result<(), NegotiationOutcome> {
        let response = self
            .runner
            .execute(conn.as_ref(), Request::Options, self.settings.request_timeout)
            .await
            .map_err(NegotiationOutcome::Failed)?;

        match response {
            Response::Supported => Ok(()),
            Response::Error { code, .. } if code == PROTOCOL_MISMATCH_CODE => {
                Err(NegotiationOutcome::Mismatch)
            }
            Response::Error { message, .. } => {
                Err(NegotiationOutcome::Failed(ControlError::Query(message)))
            }
            _ => Err(NegotiationOutcome::Failed(ControlError::Query(
                "unexpected response to OPTIONS".to_string(),
            ))),
        }
    }

    /// `Startup` and, if challenged, the authentication exchange.
    async fn startup(&self, conn: &Arc<dyn Connection>, version: u8) -> Result<(), ControlError> {
        let response = self
            .runner
            .execute(
                conn.as_ref(),
                Request::Startup { cql_version: "3.0.0".to_string() },
                self.settings.request_timeout,
            )
            .await?;

        match response {
            Response::Ready => Ok(()),
            Response::Authenticate { authenticator } => {
                self.authenticate(conn, version, &authenticator).await
            }
            Response::Error { message, .. } => Err(ControlError::Query(message)),
            _ => Err(ControlError::Query("unexpected response to STARTUP".to_string())),
        }
    }

    async fn authenticate(
        &self,
        conn: &Arc<dyn Connection>,
        version: u8,
        authenticator: &str,
    ) -> Result<(), ControlError> {
        if version < 2 {
            return Err(ControlError::Authentication(
                "challenge-response authentication is not supported below protocol version 2"
                    .to_string(),
            ));
        }

        let Some(provider) = self.settings.auth_provider.as_ref() else {
            return Err(ControlError::Authentication(
                "server requires authentication but no auth provider is configured".to_string(),
            ));
        };

        let token = provider
            .initial_response(authenticator)
            .await
            .map_err(|e| ControlError::Authentication(e.to_string()))?;

        let response = self
            .runner
            .execute(
                conn.as_ref(),
                Request::AuthResponse { token },
                self.settings.request_timeout,
            )
            .await?;

        match response {
            Response::AuthSuccess => Ok(()),
            Response::Error { message, .. } => Err(ControlError::Authentication(message)),
            _ => Err(ControlError::Authentication(
                "unexpected response during authentication".to_string(),
            )),
        }
    }

    /// `system.local` + `system.peers` + `REGISTER` (steps
    /// 4-5). Queries run strictly sequentially, never concurrently.
    async fn discover_and_subscribe(
        &self,
        ip: &str,
        conn: &Arc<dyn Connection>,
    ) -> Result<(), ControlError> {
        let local_rows = self.query_rows(conn, "SELECT * FROM system.local", &[]).await?;
        let local_row = local_rows.first().ok_or(ControlError::EmptyCluster)?;
        let local_host = host_from_local_row(ip, local_row)
            .ok_or_else(|| ControlError::Query("incomplete system.local row".to_string()))?;
        self.registry.host_found(local_host);

        self.settings.logger.info("Looking for additional nodes");
        let peer_rows = self.query_rows(conn, "SELECT * FROM system.peers", &[]).await?;
        let mut found = 0u32;
        for row in &peer_rows {
            if let Some(host) = host_from_peer_row(row) {
                self.registry.host_found(host);
                found += 1;
            }
        }
        self.settings.logger.info(&format!("{found} additional nodes found"));

        let register = self
            .runner
            .execute(
                conn.as_ref(),
                Request::Register {
                    event_types: vec![EventType::StatusChange, EventType::TopologyChange],
                },
                self.settings.request_timeout,
            )
            .await?;

        match register {
            Response::Ready => Ok(()),
            Response::Error { message, .. } => Err(ControlError::Query(message)),
            _ => Err(ControlError::Query("unexpected response to REGISTER".to_string())),
        }
    }

    async fn query_rows(
        &self,
        conn: &Arc<dyn Connection>,
        cql: &str,
        params: &[String],
    ) -> Result<Vec<Row>, ControlError> {
        let response = self
            .runner
            .execute(
                conn.as_ref(),
                Request::Query { cql: cql.to_string(), params: params.to_vec() },
                self.settings.request_timeout,
            )
            .await?;

        match response {
            Response::Result(QueryResult::Rows(rows)) => Ok(rows),
            Response::Error { message, .. } => Err(ControlError::Query(message)),
            _ => Err(ControlError::Query(format!("unexpected response to query: {cql}"))),
        }
    }

    /// Installs the event/close handlers and transitions to *CONNECTED*.
    async fn finalize_connected(self: &Arc<Self>, conn: Arc<dyn Connection>) {
        let event_inner = self.clone();
        conn.on_event(Box::new(move |event| {
            let inner = event_inner.clone();
            tokio::spawn(async move { inner.handle_event(event).await });
        }));

        let close_inner = self.clone();
        conn.on_close(Box::new(move || {
            let inner = close_inner.clone();
            tokio::spawn(async move { inner.handle_connection_lost().await });
        }));

        *self.connection.lock().await = Some(conn);
        *self.state.lock().await = State::Connected;
        metrics::gauge!("cluster_control_connected").set(1.0);
    }

    /// Connection-lost signal from the reactor.
    async fn handle_connection_lost(self: Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            if matches!(*state, State::Closing | State::Closed) {
                return;
            }
            *state = State::Reconnecting;
        }

        *self.connection.lock().await = None;
        metrics::gauge!("cluster_control_connected").set(0.0);
        self.settings.logger.warn("control: connection lost, entering reconnect loop");
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }

        let fired = self.clone();
        let handle = self.reactor.schedule(
            self.settings.reconnect_interval,
            Box::new(move || {
                let fired = fired.clone();
                tokio::spawn(async move { fired.reconnect_tick().await });
            }),
        );
        *self.reconnect_timer.lock().unwrap() = Some(handle);
    }

    /// One reconnect timer firing: try the whole connect algorithm again;
    /// reschedule on failure, forever, until success or `close_async`.
    async fn reconnect_tick(self: Arc<Self>) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }

        match self.run_connect_attempt().await {
            Ok(()) => self.settings.logger.info("control: reconnected"),
            Err(_) => self.schedule_reconnect(),
        }
    }

    /// Server-pushed event frame. Errors here are logged
    /// and swallowed — they must never tear the connection down.
    async fn handle_event(self: Arc<Self>, event: Event) {
        match event {
            Event::StatusChange { status: StatusKind::Up, address } => {
                let ip = normalize_address(&address);
                self.settings.logger.debug(&format!("control: event: status_change up, address={ip}"));
                if self.registry.host_known(&ip) {
                    self.refresh_peer(&ip).await;
                }
            }
            Event::StatusChange { status: StatusKind::Down, address } => {
                let ip = normalize_address(&address);
                self.settings
                    .logger
                    .debug(&format!("control: event: status_change down, address={ip}"));
                self.registry.host_down(&ip);
            }
            Event::TopologyChange { kind: TopologyKind::NewNode, address } => {
                let ip = normalize_address(&address);
                self.settings
                    .logger
                    .debug(&format!("control: event: topology_change new_node, address={ip}"));
                if !self.registry.host_known(&ip) {
                    self.refresh_peer(&ip).await;
                }
            }
            Event::TopologyChange { kind: TopologyKind::RemovedNode, address } => {
                let ip = normalize_address(&address);
                self.settings.logger.debug(&format!(
                    "control: event: topology_change removed_node, address={ip}"
                ));
                self.registry.host_lost(&ip);
            }
        }
    }

    /// Peers-by-IP refresh used by both `StatusChange(UP)` and
    /// `TopologyChange(NEW_NODE)`. Whether the refresh
    /// returns zero rows is unspecified upstream; this core
    /// logs a warning and leaves the host's attributes unchanged.
    async fn refresh_peer(self: &Arc<Self>, ip: &str) {
        let Some(conn) = self.connection.lock().await.clone() else {
            return;
        };

        let rows = match self
            .query_rows(&conn, "SELECT * FROM system.peers WHERE peer = ?", &[ip.to_string()])
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                self.settings.logger.warn(&format!("control: peers refresh for {ip} failed: {e}"));
                return;
            }
        };

        match rows.first().and_then(host_from_peer_row) {
            Some(host) => self.registry.host_found(host),
            None => self.settings.logger.warn(&format!(
                "control: peers refresh for {ip} returned no usable row, host attributes left unchanged"
            )),
        }
    }
}

enum NegotiationOutcome {
    Mismatch,
    Failed(ControlError),
}

fn parse_uuid(row: &Row, key: &str) -> Option<Uuid> {
    row.get(key).and_then(|s| Uuid::parse_str(s).ok())
}

fn host_from_local_row(ip: &str, row: &Row) -> Option<Host> {
    Some(Host::new(
        ip,
        row.get("data_center")?.clone(),
        row.get("rack")?.clone(),
        parse_uuid(row, "host_id")?,
        row.get("release_version")?.clone(),
    ))
}

fn host_from_peer_row(row: &Row) -> Option<Host> {
    let ip = peer_ip(row)?;
    Some(Host::new(
        ip,
        row.get("data_center")?.clone(),
        row.get("rack")?.clone(),
        parse_uuid(row, "host_id")?,
        row.get("release_version")?.clone(),
    ))
}

/// `rpc_address` wins unless it's the unspecified `0.0.0.0` placeholder, in
/// which case `peer` is used instead.
fn peer_ip(row: &Row) -> Option<String> {
    match row.get("rpc_address") {
        Some(addr) if addr != "0.0.0.0" => Some(addr.clone()),
        _ => row.get("peer").cloned(),
    }
}

/// Event addresses ignore their port component.
fn normalize_address(address: &str) -> String {
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            host.to_string()
        }
        _ => address.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn peer_ip_prefers_rpc_address() {
        let r = row(&[("rpc_address", "10.0.0.5"), ("peer", "10.0.0.9")]);
        assert_eq!(peer_ip(&r), Some("10.0.0.5".to_string()));
    }

    #[test]
    fn peer_ip_falls_back_to_peer_on_unspecified_rpc_address() {
        let r = row(&[("rpc_address", "0.0.0.0"), ("peer", "10.0.0.9")]);
        assert_eq!(peer_ip(&r), Some("10.0.0.9".to_string()));
    }

    #[test]
    fn peer_ip_falls_back_to_peer_when_rpc_address_absent() {
        let r = row(&[("peer", "10.0.0.9")]);
        assert_eq!(peer_ip(&r), Some("10.0.0.9".to_string()));
    }

    #[test]
    fn normalize_address_strips_port() {
        assert_eq!(normalize_address("127.0.0.1:9042"), "127.0.0.1");
    }

    #[test]
    fn normalize_address_leaves_bare_ip_untouched() {
        assert_eq!(normalize_address("127.0.0.1"), "127.0.0.1");
    }

    #[test]
    fn host_from_local_row_requires_all_fields() {
        let complete = row(&[
            ("data_center", "dc1"),
            ("rack", "rack1"),
            ("host_id", &Uuid::nil().to_string()),
            ("release_version", "4.0"),
        ]);
        assert!(host_from_local_row("127.0.0.1", &complete).is_some());

        let incomplete = row(&[("data_center", "dc1")]);
        assert!(host_from_local_row("127.0.0.1", &incomplete).is_none());
    }
}
