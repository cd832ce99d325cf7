use uuid::Uuid;

/// Immutable description of one cluster member. Identity is
/// the IP; any attribute change replaces the whole record rather than
/// mutating in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub ip: String,
    pub datacenter: String,
    pub rack: String,
    pub host_id: Uuid,
    pub release_version: String,
}

impl Host {
    pub fn new(
        ip: impl Into<String>,
        datacenter: impl Into<String>,
        rack: impl Into<String>,
        host_id: Uuid,
        release_version: impl Into<String>,
    ) -> Self {
        Self {
            ip: ip.into(),
            datacenter: datacenter.into(),
            rack: rack.into(),
            host_id,
            release_version: release_version.into(),
        }
    }

    /// Placeholder record for a contact point that hasn't been discovered
    /// yet — seeded into the Registry so `connect_async` has a candidate
    /// IP to dial before any `system.local`/`system.peers` row has been
    /// read. Replaced by its real attributes on first successful discovery.
    pub fn seed(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            datacenter: String::new(),
            rack: String::new(),
            host_id: Uuid::nil(),
            release_version: String::new(),
        }
    }

    /// The subset of fields compared to decide whether `host_found` should
    /// be a no-op ("if `attrs` equals the stored host's
    /// attributes, do nothing").
    pub fn attributes_eq(&self, other: &Host) -> bool {
        self.datacenter == other.datacenter
            && self.rack == other.rack
            && self.host_id == other.host_id
            && self.release_version == other.release_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_eq_ignores_ip() {
        let id = Uuid::new_v4();
        let a = Host::new("10.0.0.1", "dc1", "rack1", id, "4.0");
        let b = Host::new("10.0.0.2", "dc1", "rack1", id, "4.0");
        assert!(a.attributes_eq(&b));
    }

    #[test]
    fn attributes_eq_detects_any_field_change() {
        let id = Uuid::new_v4();
        let a = Host::new("10.0.0.1", "dc1", "rack1", id, "4.0");
        let b = Host::new("10.0.0.1", "dc1", "rack1", id, "4.1");
        assert!(!a.attributes_eq(&b));
    }

    #[test]
    fn seed_host_has_nil_id_and_empty_attrs() {
        let seed = Host::seed("10.0.0.1");
        assert_eq!(seed.ip, "10.0.0.1");
        assert_eq!(seed.host_id, Uuid::nil());
        assert!(seed.datacenter.is_empty());
    }
}
