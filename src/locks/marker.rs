/*!
 * Owner Markers
 * On-disk identity records: `<name>.lid.<app>.<host>[.<port>].<pid>.tmp`
 * hard-linked to the lock target. The file name format is a
 * compatibility contract and must be preserved bit-for-bit.
 */

use crate::core::limits::{MARKER_INFIX, MARKER_SUFFIX};
use crate::core::types::{Identity, Pid};

/// Parsed owner marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerMarker {
    pub app: String,
    pub host: String,
    pub port: Option<u16>,
    pub pid: Pid,
    /// File name the marker was parsed from
    pub file_name: String,
}

impl OwnerMarker {
    /// Marker file name for `target_name` held by `identity`
    pub fn file_name_for(target_name: &str, identity: &Identity) -> String {
        match identity.port {
            Some(port) => format!(
                "{}{}{}.{}.{}.{}{}",
                target_name, MARKER_INFIX, identity.app, identity.host, port, identity.pid,
                MARKER_SUFFIX
            ),
            None => format!(
                "{}{}{}.{}.{}{}",
                target_name, MARKER_INFIX, identity.app, identity.host, identity.pid,
                MARKER_SUFFIX
            ),
        }
    }

    /// Parse a directory entry as an owner marker for `target_name`.
    /// Returns None for entries that belong to other targets or are not
    /// markers at all.
    pub fn parse(file_name: &str, target_name: &str) -> Option<Self> {
        let prefix = format!("{}{}", target_name, MARKER_INFIX);
        let body = file_name
            .strip_prefix(&prefix)?
            .strip_suffix(MARKER_SUFFIX)?;

        // fields: <app>.<host>[.<port>].<pid>; host may itself contain
        // dots, so parse app from the front and pid/port from the back
        let mut fields: Vec<&str> = body.split('.').collect();
        if fields.len() < 3 {
            return None;
        }
        let pid: Pid = fields.pop()?.parse().ok()?;
        let app = fields.remove(0).to_string();
        if fields.is_empty() {
            return None;
        }
        let port = if fields.len() >= 2 {
            match fields.last().and_then(|s| s.parse::<u16>().ok()) {
                Some(port) => {
                    fields.pop();
                    Some(port)
                }
                None => None,
            }
        } else {
            None
        };
        Some(Self {
            app,
            host: fields.join("."),
            port,
            pid,
            file_name: file_name.to_string(),
        })
    }

    /// Whether this marker was written by `identity`
    pub fn belongs_to(&self, identity: &Identity) -> bool {
        self.app == identity.app
            && self.host == identity.host
            && self.port == identity.port
            && self.pid == identity.pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity {
            app: "psrp".to_string(),
            host: "node7".to_string(),
            port: None,
            pid: 4242,
        }
    }

    #[test]
    fn format_without_port() {
        let name = OwnerMarker::file_name_for("data", &identity());
        assert_eq!(name, "data.lid.psrp.node7.4242.tmp");
    }

    #[test]
    fn format_with_port() {
        let name = OwnerMarker::file_name_for("data", &identity().with_port(9000));
        assert_eq!(name, "data.lid.psrp.node7.9000.4242.tmp");
    }

    #[test]
    fn parse_round_trip() {
        let id = identity().with_port(9000);
        let name = OwnerMarker::file_name_for("data", &id);
        let marker = OwnerMarker::parse(&name, "data").unwrap();
        assert_eq!(marker.app, "psrp");
        assert_eq!(marker.host, "node7");
        assert_eq!(marker.port, Some(9000));
        assert_eq!(marker.pid, 4242);
        assert!(marker.belongs_to(&id));
    }

    #[test]
    fn parse_dotted_host() {
        let marker = OwnerMarker::parse("data.lid.psrp.node7_example_com.4242.tmp", "data").unwrap();
        assert_eq!(marker.host, "node7_example_com");
        assert_eq!(marker.port, None);
    }

    #[test]
    fn parse_rejects_foreign_entries() {
        assert!(OwnerMarker::parse("data.lock", "data").is_none());
        assert!(OwnerMarker::parse("other.lid.psrp.node7.1.tmp", "data").is_none());
        assert!(OwnerMarker::parse("data.lid.psrp.tmp", "data").is_none());
    }
}
