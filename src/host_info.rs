//! `HOST_INFO` document (spec §6): the server's transport endpoints and
//! supported extensions. Field naming is grounded on
//! `Raphiiko-oyasumivr_oscquery`'s `OSCQueryHostInfo`
//! (`#[serde(rename_all = "SCREAMING_SNAKE_CASE")]`), extended with the
//! WS/OSC fields and the EXTENSIONS map this spec actually requires.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// The static extension set is always advertised; `LISTEN`/`PATH_CHANGED`
/// are only true while the WebSocket hub is running.
#[derive(Debug, Clone, Copy)]
pub struct HostInfoExtensions {
    pub ws_running: bool,
}

const STATIC_EXTENSIONS: &[&str] = &["ACCESS", "VALUE", "RANGE", "DESCRIPTION", "TAGS", "CRITICAL", "CLIPMODE"];

impl Serialize for HostInfoExtensions {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut m = serializer.serialize_map(Some(STATIC_EXTENSIONS.len() + 2))?;
        for key in STATIC_EXTENSIONS {
            m.serialize_entry(key, &true)?;
        }
        if self.ws_running {
            m.serialize_entry("LISTEN", &true)?;
            m.serialize_entry("PATH_CHANGED", &true)?;
        }
        m.end()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct HostInfo {
    pub name: String,
    pub extensions: HostInfoExtensions,
    pub osc_ip: String,
    pub osc_port: u16,
    pub osc_transport: String,
    pub ws_ip: String,
    pub ws_port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_extension_reflects_ws_state() {
        let info = HostInfo {
            name: "OSCQuery".into(),
            extensions: HostInfoExtensions { ws_running: true },
            osc_ip: "0.0.0.0".into(),
            osc_port: 9000,
            osc_transport: "UDP".into(),
            ws_ip: "0.0.0.0".into(),
            ws_port: 9000,
        };
        let v = serde_json::to_value(&info).unwrap();
        assert_eq!(v["EXTENSIONS"]["LISTEN"], true);

        let info_no_ws = HostInfo { extensions: HostInfoExtensions { ws_running: false }, ..info };
        let v = serde_json::to_value(&info_no_ws).unwrap();
        assert!(v["EXTENSIONS"].get("LISTEN").is_none());
    }
}
