// mDNS advertisement for this process
//
// Publishes the instance record with TXT metadata and tears it down on
// stop. Stop is idempotent; Drop performs the same teardown.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use mdns_sd::{ServiceDaemon, ServiceInfo};

use super::{encode_txt, parse_txt_record, DEFAULT_DOMAIN, DEFAULT_SERVICE, FALLBACK_INSTANCE};

/// Metadata broadcast for this service. Empty fields fall back to the
/// fabric defaults; the instance falls back to the OS hostname.
#[derive(Debug, Clone, Default)]
pub struct AnnounceOptions {
    pub instance: String,
    pub service: String,
    pub domain: String,
    pub port: u16,
    pub text: HashMap<String, String>,
}

impl AnnounceOptions {
    fn with_defaults(mut self) -> Self {
        if self.service.trim().is_empty() {
            self.service = DEFAULT_SERVICE.to_string();
        }
        if self.domain.trim().is_empty() {
            self.domain = DEFAULT_DOMAIN.to_string();
        }
        if self.instance.trim().is_empty() {
            self.instance = default_instance();
        }
        self
    }
}

/// Best instance name available: configured, then hostname, then a
/// constant fallback.
pub fn default_instance() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_INSTANCE.to_string())
}

/// Manages the lifetime of an mDNS advertisement.
pub struct Announcer {
    daemon: Option<ServiceDaemon>,
    fullname: String,
}

impl std::fmt::Debug for Announcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Announcer")
            .field("fullname", &self.fullname)
            .finish()
    }
}

impl Announcer {
    /// Publish an mDNS record for this process and return a controller
    /// for its lifetime.
    pub fn new(opts: AnnounceOptions) -> Result<Self> {
        let opts = opts.with_defaults();
        if opts.port == 0 {
            bail!("invalid port {}", opts.port);
        }

        let records = encode_txt(&opts.text);
        let properties: HashMap<String, String> = records
            .iter()
            .filter_map(|record| parse_txt_record(record))
            .collect();

        let type_domain = format!("{}.{}", opts.service, opts.domain);
        let host = format!("{}.local.", default_instance());

        let info = ServiceInfo::new(
            &type_domain,
            &opts.instance,
            &host,
            "",
            opts.port,
            properties,
        )
        .context("build mDNS service record")?
        .enable_addr_auto();
        let fullname = info.get_fullname().to_string();

        let daemon = ServiceDaemon::new().context("create mDNS daemon")?;
        daemon
            .register(info)
            .with_context(|| format!("register {fullname}"))?;

        tracing::info!(
            instance = %opts.instance,
            port = opts.port,
            txt = ?records,
            "mDNS advertisement published"
        );

        Ok(Self {
            daemon: Some(daemon),
            fullname,
        })
    }

    /// Remove the advertisement. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(daemon) = self.daemon.take() {
            let _ = daemon.unregister(&self.fullname);
            let _ = daemon.shutdown();
            tracing::info!(fullname = %self.fullname, "mDNS advertisement withdrawn");
        }
    }
}

impl Drop for Announcer {
    fn drop(&mut self) {
        self.stop();
    }
}
