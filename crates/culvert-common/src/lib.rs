mod error;
mod pump;
mod tls;

pub use error::TunnelError;
pub use pump::{pump, PUMP_LINGER};
pub use tls::{
    load_client_config, load_client_config_mutual, load_server_config,
    load_server_config_no_client_auth,
};
