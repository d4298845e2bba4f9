use mysql_async::SslOpts;

/// TLS settings applied when connecting to a target database
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// Accept invalid or self-signed certificates presented by the target.
    pub disable_verification: bool,
}

impl TlsOptions {
    pub(crate) fn postgres_connector(
        &self,
    ) -> Result<postgres_native_tls::MakeTlsConnector, native_tls::Error> {
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(self.disable_verification)
            .build()?;
        Ok(postgres_native_tls::MakeTlsConnector::new(connector))
    }

    /// Only touches SSL options the URL already asked for; never turns TLS on by itself.
    pub(crate) fn mysql_ssl_opts(&self, existing: Option<&SslOpts>) -> Option<SslOpts> {
        existing.cloned().map(|ssl_opts| {
            if self.disable_verification {
                ssl_opts.with_danger_accept_invalid_certs(true)
            } else {
                ssl_opts
            }
        })
    }
}
