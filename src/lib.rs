mod codec;
mod error;
mod host_info;
mod http;
mod node;
mod osc_type;
mod sanitize;
mod server;
mod ws;

pub mod discovery;

pub use codec::{decode_message, encode_message, DecodedMessage};
pub use error::{OscQueryError, Result};
pub use host_info::HostInfo;
pub use node::{Access, ArgumentDescriptor, ClipMode, NodeHandle, NodeOpts, NodeQueryParam, RangeEntry, Tree};
pub use osc_type::{type_string, OSCType, SimpleType};
pub use sanitize::sanitize_service_name;
pub use server::{OSCQueryService, OSCQueryServiceOptions, OscTransport, ServerState};
pub use ws::WsHub;

pub mod osc {
    pub use rosc::*;
}
