use umbrella_proto::Protocol;

/// Identity of a backend cache server: address plus connection metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessPoint {
    host: String,
    port: u16,
    protocol: Protocol,
    use_ssl: bool,
}

impl AccessPoint {
    /// Create an access point speaking the given protocol, without TLS.
    pub fn new(host: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
            use_ssl: false,
        }
    }

    /// Mark this access point as requiring TLS.
    pub fn with_ssl(mut self) -> Self {
        self.use_ssl = true;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn use_ssl(&self) -> bool {
        self.use_ssl
    }
}

impl std::fmt::Display for AccessPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
