use crate::host::Host;
use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// The observer protocol by which Registry mutations are propagated. A
/// concrete load-balancing policy is one implementation; callers may
/// register as many listeners as they like.
pub trait ClusterListener: Send + Sync {
    fn host_found(&self, host: &Host);
    fn host_lost(&self, ip: &str);
    fn host_up(&self, ip: &str);
    fn host_down(&self, ip: &str);
}

struct Entry {
    host: Host,
    up: bool,
}

/// The authoritative in-memory set of known hosts.
///
/// Holds an insertion-ordered IP list alongside a concurrent IP → host map,
/// and notifies registered listeners synchronously, on the caller's thread
/// of execution, for every mutation that changes observable state. Modeled
/// after `hermes_gateway::upstream::cluster::Cluster`'s
/// `DashMap`-backed live-state map paired with its `ArcSwap`-backed
/// `discovered_nodes` snapshot, which is exactly the ordered/lookup split
/// the Registry needs: the IP order is read far more often than it's
/// written, so `ips()`/`hosts()` load a snapshot without blocking writers.
pub struct Registry {
    order: ArcSwap<Vec<String>>,
    entries: DashMap<String, Entry>,
    listeners: Mutex<Vec<Arc<dyn ClusterListener>>>,
    /// Set for the duration of a notification fan-out; used to detect and
    /// reject re-entrant mutation from within a listener callback.
    notifying: AtomicBool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            order: ArcSwap::from_pointee(Vec::new()),
            entries: DashMap::new(),
            listeners: Mutex::new(Vec::new()),
            notifying: AtomicBool::new(false),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn ClusterListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    /// Guard a mutation entrypoint against re-entrant calls from inside a
    /// listener notification. Returns `false` (and logs) if rejected.
    fn enter_mutation(&self) -> bool {
        if self.notifying.load(Ordering::Acquire) {
            tracing::error!(
                "registry: rejected re-entrant mutation from within a listener notification"
            );
            return false;
        }
        true
    }

    fn notify(&self, f: impl Fn(&dyn ClusterListener)) {
        self.notifying.store(true, Ordering::Release);
        let listeners = self.listeners.lock().unwrap();
        for listener in listeners.iter() {
            f(listener.as_ref());
        }
        drop(listeners);
        self.notifying.store(false, Ordering::Release);
    }

    /// First-ever call for an IP always emits `host_found`. A repeat call
    /// with attributes equal to the stored host is a no-op; otherwise the
    /// stored host is replaced (never mutated in place) and `host_found`
    /// fires again, carrying the new attributes. A host discovered again
    /// after having been marked down is implicitly brought back up.
    pub fn host_found(&self, host: Host) {
        if !self.enter_mutation() {
            return;
        }

        let ip = host.ip.clone();
        let changed = match self.entries.get(&ip) {
            Some(existing) => !existing.host.attributes_eq(&host),
            None => true,
        };

        if !changed {
            return;
        }

        let first_time = !self.entries.contains_key(&ip);
        self.entries.insert(ip.clone(), Entry { host: host.clone(), up: true });

        if first_time {
            self.order.rcu(|current| {
                let mut next = (**current).clone();
                next.push(ip.clone());
                next
            });
            metrics::gauge!("cluster_control_registry_hosts").increment(1.0);
        }

        metrics::counter!("cluster_control_registry_host_found_total").increment(1);
        self.notify(|l| l.host_found(&host));
    }

    /// Emits `host_up` iff the host's liveness state flips from down to up.
    pub fn host_up(&self, ip: &str) {
        if !self.enter_mutation() {
            return;
        }

        let flipped = match self.entries.get_mut(ip) {
            Some(mut entry) if !entry.up => {
                entry.up = true;
                true
            }
            _ => false,
        };

        if flipped {
            let ip = ip.to_string();
            metrics::counter!("cluster_control_registry_host_up_total").increment(1);
            self.notify(|l| l.host_up(&ip));
        }
    }

    /// Emits `host_down` iff the host's liveness state flips from up to down.
    pub fn host_down(&self, ip: &str) {
        if !self.enter_mutation() {
            return;
        }

        let flipped = match self.entries.get_mut(ip) {
            Some(mut entry) if entry.up => {
                entry.up = false;
                true
            }
            _ => false,
        };

        if flipped {
            let ip = ip.to_string();
            metrics::counter!("cluster_control_registry_host_down_total").increment(1);
            self.notify(|l| l.host_down(&ip));
        }
    }

    /// Removes the host. Emits `host_lost` iff the IP was known. After this
    /// call, `host_known?` returns false for the IP until a subsequent
    /// `host_found`.
    pub fn host_lost(&self, ip: &str) {
        if !self.enter_mutation() {
            return;
        }

        let removed = self.entries.remove(ip).is_some();
        if removed {
            self.order.rcu(|current| {
                current.iter().filter(|known| known.as_str() != ip).cloned().collect::<Vec<_>>()
            });
            let ip = ip.to_string();
            metrics::gauge!("cluster_control_registry_hosts").decrement(1.0);
            metrics::counter!("cluster_control_registry_host_lost_total").increment(1);
            self.notify(|l| l.host_lost(&ip));
        }
    }

    pub fn host_known(&self, ip: &str) -> bool {
        self.entries.contains_key(ip)
    }

    /// Snapshot of currently known hosts, in insertion order. Lock-free:
    /// reads the current `order` snapshot without contending with writers.
    pub fn hosts(&self) -> Vec<Host> {
        self.order
            .load()
            .iter()
            .filter_map(|ip| self.entries.get(ip).map(|e| e.host.clone()))
            .collect()
    }

    /// Snapshot of currently known IPs, in insertion order — the candidate
    /// list `connect_async` walks.
    pub fn ips(&self) -> Vec<String> {
        (**self.order.load()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;

    fn host(ip: &str, release: &str) -> Host {
        Host::new(ip, "dc1", "rack1", Uuid::nil(), release)
    }

    #[derive(Default)]
    struct RecordingListener {
        events: StdMutex<Vec<String>>,
    }

    impl ClusterListener for RecordingListener {
        fn host_found(&self, host: &Host) {
            self.events.lock().unwrap().push(format!("found:{}", host.ip));
        }
        fn host_lost(&self, ip: &str) {
            self.events.lock().unwrap().push(format!("lost:{ip}"));
        }
        fn host_up(&self, ip: &str) {
            self.events.lock().unwrap().push(format!("up:{ip}"));
        }
        fn host_down(&self, ip: &str) {
            self.events.lock().unwrap().push(format!("down:{ip}"));
        }
    }

    #[test]
    fn first_host_found_always_emits() {
        let registry = Registry::new();
        let listener = Arc::new(RecordingListener::default());
        registry.add_listener(listener.clone());

        registry.host_found(host("10.0.0.1", "4.0"));

        assert_eq!(*listener.events.lock().unwrap(), vec!["found:10.0.0.1"]);
        assert!(registry.host_known("10.0.0.1"));
        assert_eq!(registry.ips(), vec!["10.0.0.1"]);
    }

    #[test]
    fn repeat_host_found_with_equal_attrs_is_a_no_op() {
        let registry = Registry::new();
        let listener = Arc::new(RecordingListener::default());
        registry.add_listener(listener.clone());

        registry.host_found(host("10.0.0.1", "4.0"));
        registry.host_found(host("10.0.0.1", "4.0"));

        assert_eq!(listener.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn changed_attrs_replace_the_host_and_emit_again() {
        let registry = Registry::new();
        let listener = Arc::new(RecordingListener::default());
        registry.add_listener(listener.clone());

        registry.host_found(host("10.0.0.1", "4.0"));
        registry.host_found(host("10.0.0.1", "4.1"));

        assert_eq!(listener.events.lock().unwrap().len(), 2);
        assert_eq!(registry.hosts()[0].release_version, "4.1");
    }

    #[test]
    fn host_up_and_down_emit_only_on_flip() {
        let registry = Registry::new();
        let listener = Arc::new(RecordingListener::default());
        registry.add_listener(listener.clone());
        registry.host_found(host("10.0.0.1", "4.0"));

        registry.host_up("10.0.0.1"); // already up, no flip
        registry.host_down("10.0.0.1");
        registry.host_down("10.0.0.1"); // already down, no flip
        registry.host_up("10.0.0.1");

        let events = listener.events.lock().unwrap();
        assert_eq!(*events, vec!["found:10.0.0.1", "down:10.0.0.1", "up:10.0.0.1"]);
    }

    #[test]
    fn host_lost_removes_and_allows_rediscovery() {
        let registry = Registry::new();
        let listener = Arc::new(RecordingListener::default());
        registry.add_listener(listener.clone());

        registry.host_found(host("10.0.0.1", "4.0"));
        registry.host_lost("10.0.0.1");

        assert!(!registry.host_known("10.0.0.1"));
        assert!(registry.ips().is_empty());

        registry.host_found(host("10.0.0.1", "4.0"));
        assert!(registry.host_known("10.0.0.1"));

        let events = listener.events.lock().unwrap();
        assert_eq!(*events, vec!["found:10.0.0.1", "lost:10.0.0.1", "found:10.0.0.1"]);
    }

    #[test]
    fn host_lost_for_unknown_ip_emits_nothing() {
        let registry = Registry::new();
        let listener = Arc::new(RecordingListener::default());
        registry.add_listener(listener.clone());

        registry.host_lost("10.0.0.9");

        assert!(listener.events.lock().unwrap().is_empty());
    }

    #[test]
    fn hosts_and_ips_preserve_insertion_order() {
        let registry = Registry::new();
        registry.host_found(host("10.0.0.3", "4.0"));
        registry.host_found(host("10.0.0.1", "4.0"));
        registry.host_found(host("10.0.0.2", "4.0"));

        assert_eq!(registry.ips(), vec!["10.0.0.3", "10.0.0.1", "10.0.0.2"]);
        assert_eq!(
            registry.hosts().iter().map(|h| h.ip.clone()).collect::<Vec<_>>(),
            vec!["10.0.0.3", "10.0.0.1", "10.0.0.2"]
        );
    }
}
