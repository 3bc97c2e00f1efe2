use std::fmt;

#[derive(Debug)]
pub enum GatewayError {
    MissingTenant,
    NoRouteMatch,
    EmptyPool,
    NoHealthyUpstream,
    UpstreamTimeout,
    UpstreamConnect(String),
    Config(String),
    Internal(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::MissingTenant => write!(f, "missing tenant header"),
            GatewayError::NoRouteMatch => write!(f, "no route matched"),
            GatewayError::EmptyPool => write!(f, "no upstream servers configured"),
            GatewayError::NoHealthyUpstream => {
                write!(f, "no healthy upstreams (all circuits open)")
            }
            GatewayError::UpstreamTimeout => write!(f, "upstream timeout"),
            GatewayError::UpstreamConnect(msg) => write!(f, "upstream connect error: {}", msg),
            GatewayError::Config(msg) => write!(f, "config error: {}", msg),
            GatewayError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for GatewayError {}
