use anyhow::{Context, Result};
use quiche::{Config, CongestionControlAlgorithm};

use crate::config::models::{CongestionControl, QuicConfig, TlsConfig};

/// Builds the quiche transport config from the static QUIC/TLS settings.
/// `quiche::Config` isn't `Clone`, so the server builds one instance at
/// startup and reuses it (via `&mut`) to accept every connection.
pub struct QuicheConfig {
    quic: QuicConfig,
    tls: TlsConfig,
}

impl QuicheConfig {
    pub fn new(quic: &QuicConfig, tls: &TlsConfig) -> Self {
        Self {
            quic: quic.clone(),
            tls: tls.clone(),
        }
    }

    pub fn build(&self) -> Result<Config> {
        let mut config =
            Config::new(quiche::PROTOCOL_VERSION).context("failed to create QUIC config")?;

        config
            .set_application_protos(&[b"h3"])
            .context("failed to set HTTP/3 ALPN")?;

        config.set_initial_max_data(self.quic.max_data);
        config.set_initial_max_stream_data_bidi_local(self.quic.max_stream_data);
        config.set_initial_max_stream_data_bidi_remote(self.quic.max_stream_data);
        config.set_initial_max_stream_data_uni(self.quic.max_stream_data);
        config.set_initial_max_streams_bidi(self.quic.max_streams_per_connection);
        config.set_initial_max_streams_uni(self.quic.max_streams_per_connection);

        let cc_algorithm = match self.quic.congestion_control {
            CongestionControl::Cubic => CongestionControlAlgorithm::CUBIC,
            CongestionControl::Bbr => CongestionControlAlgorithm::BBR,
            CongestionControl::Newreno => CongestionControlAlgorithm::Reno,
        };
        config.set_cc_algorithm(cc_algorithm);
        config.set_max_idle_timeout(self.quic.max_idle_timeout.as_millis() as u64);

        if self.quic.enable_0rtt {
            config.enable_early_data();
        }

        config
            .load_cert_chain_from_pem_file(&self.tls.cert_path)
            .with_context(|| format!("failed to load certificate from {}", self.tls.cert_path))?;
        config
            .load_priv_key_from_pem_file(&self.tls.key_path)
            .with_context(|| format!("failed to load private key from {}", self.tls.key_path))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn quic_config() -> QuicConfig {
        QuicConfig {
            max_streams_per_connection: 100,
            max_idle_timeout: Duration::from_secs(30),
            keep_alive_period: Duration::from_secs(10),
            enable_0rtt: false,
            congestion_control: CongestionControl::Cubic,
            max_data: 10_000_000,
            max_stream_data: 1_000_000,
        }
    }

    fn tls_config(cert_path: &str, key_path: &str) -> TlsConfig {
        TlsConfig {
            cert_path: cert_path.to_string(),
            key_path: key_path.to_string(),
        }
    }

    #[test]
    fn build_fails_with_missing_cert_files() {
        let cfg = QuicheConfig::new(&quic_config(), &tls_config("missing/cert.pem", "missing/key.pem"));
        let result = cfg.build();
        assert!(result.is_err());
    }

    #[test]
    fn congestion_control_variants_all_map() {
        for cc in [CongestionControl::Cubic, CongestionControl::Bbr, CongestionControl::Newreno] {
            let mut quic = quic_config();
            quic.congestion_control = cc;
            let cfg = QuicheConfig::new(&quic, &tls_config("missing/cert.pem", "missing/key.pem"));
            // Construction never touches the filesystem; only `build()` loads certs.
            assert_eq!(cfg.quic.congestion_control, cc);
        }
    }
}
