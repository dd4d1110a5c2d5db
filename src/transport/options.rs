use super::*;

use async_ssh2_tokio::Config;

/// How much legacy cryptography a connection may negotiate.
///
/// Each level offers a superset of the algorithms of the level before it.
/// Old switch firmware often speaks nothing newer than SHA-1 key exchange and
/// CBC ciphers, so fleets with such devices need a wider level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    #[default]
    Secure,
    Balanced,
    LegacyCompatible,
}

impl SecurityLevel {
    /// Every level, narrowest first.
    pub const ALL: [SecurityLevel; 3] = [
        SecurityLevel::Secure,
        SecurityLevel::Balanced,
        SecurityLevel::LegacyCompatible,
    ];

    /// Algorithm lists offered during key exchange.
    pub fn algorithms(self) -> Preferred {
        let (kex, key, cipher, mac) = match self {
            SecurityLevel::Secure => (
                config::SECURE_KEX_ORDER,
                config::SECURE_KEY_TYPES,
                config::SECURE_CIPHERS,
                config::SECURE_MAC_ALGORITHMS,
            ),
            SecurityLevel::Balanced => (
                config::BALANCED_KEX_ORDER,
                config::BALANCED_KEY_TYPES,
                config::BALANCED_CIPHERS,
                config::BALANCED_MAC_ALGORITHMS,
            ),
            SecurityLevel::LegacyCompatible => (
                config::LEGACY_KEX_ORDER,
                config::LEGACY_KEY_TYPES,
                config::LEGACY_CIPHERS,
                config::LEGACY_MAC_ALGORITHMS,
            ),
        };
        Preferred {
            kex: Cow::Borrowed(kex),
            key: Cow::Borrowed(key),
            cipher: Cow::Borrowed(cipher),
            mac: Cow::Borrowed(mac),
            compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
        }
    }

    /// Host key verification used unless overridden. Devices that need the
    /// legacy level rarely have their keys in a known-hosts file.
    fn default_server_check(self) -> ServerCheckMethod {
        match self {
            SecurityLevel::LegacyCompatible => ServerCheckMethod::NoCheck,
            _ => ServerCheckMethod::DefaultKnownHostsFile,
        }
    }
}

/// Connection settings of an [`SshTransport`].
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub level: SecurityLevel,
    pub server_check: ServerCheckMethod,
    /// Idle time after which the connection is dropped. `None` keeps it open.
    pub inactivity_timeout: Option<Duration>,
    /// Interval of SSH keepalive requests on otherwise idle sessions.
    pub keepalive_interval: Option<Duration>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self::new(SecurityLevel::default())
    }
}

impl SshOptions {
    pub fn new(level: SecurityLevel) -> Self {
        Self {
            level,
            server_check: level.default_server_check(),
            inactivity_timeout: Some(config::DEFAULT_INACTIVITY_TIMEOUT),
            keepalive_interval: None,
        }
    }

    pub fn with_server_check(mut self, server_check: ServerCheckMethod) -> Self {
        self.server_check = server_check;
        self
    }

    pub fn with_inactivity_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    /// Keeps pooled sessions alive between batches.
    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }

    pub(super) fn client_config(&self) -> Config {
        Config {
            preferred: self.level.algorithms(),
            inactivity_timeout: self.inactivity_timeout,
            keepalive_interval: self.keepalive_interval,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::{cipher, kex, mac};

    fn is_subset<T: PartialEq>(narrow: &[T], wide: &[T]) -> bool {
        narrow.iter().all(|alg| wide.contains(alg))
    }

    #[test]
    fn each_level_widens_the_previous_one() {
        for pair in SecurityLevel::ALL.windows(2) {
            let narrow = pair[0].algorithms();
            let wide = pair[1].algorithms();
            assert!(is_subset(&narrow.kex, &wide.kex), "{:?} kex", pair[1]);
            assert!(is_subset(&narrow.key, &wide.key), "{:?} key", pair[1]);
            assert!(is_subset(&narrow.cipher, &wide.cipher), "{:?} cipher", pair[1]);
            assert!(is_subset(&narrow.mac, &wide.mac), "{:?} mac", pair[1]);
        }
    }

    #[test]
    fn only_legacy_level_allows_unprotected_transport() {
        for level in SecurityLevel::ALL {
            let algorithms = level.algorithms();
            let legacy = level == SecurityLevel::LegacyCompatible;
            assert_eq!(algorithms.cipher.contains(&cipher::NONE), legacy);
            assert_eq!(algorithms.mac.contains(&mac::NONE), legacy);
            assert_eq!(algorithms.kex.contains(&kex::DH_G1_SHA1), legacy);
        }
    }

    #[test]
    fn cbc_ciphers_start_at_balanced() {
        assert!(!SecurityLevel::Secure.algorithms().cipher.contains(&cipher::AES_128_CBC));
        assert!(SecurityLevel::Balanced.algorithms().cipher.contains(&cipher::AES_128_CBC));
    }

    #[test]
    fn legacy_level_skips_host_key_check_unless_overridden() {
        let options = SshOptions::new(SecurityLevel::LegacyCompatible);
        assert!(matches!(options.server_check, ServerCheckMethod::NoCheck));

        let pinned = options.with_server_check(ServerCheckMethod::DefaultKnownHostsFile);
        assert!(matches!(pinned.server_check, ServerCheckMethod::DefaultKnownHostsFile));
        assert_eq!(pinned.level, SecurityLevel::LegacyCompatible);

        let default = SshOptions::default();
        assert_eq!(default.level, SecurityLevel::Secure);
        assert!(matches!(default.server_check, ServerCheckMethod::DefaultKnownHostsFile));
    }

    #[test]
    fn client_config_carries_timers_and_algorithms() {
        let config = SshOptions::new(SecurityLevel::Balanced)
            .with_inactivity_timeout(None)
            .with_keepalive(Duration::from_secs(30))
            .client_config();
        assert_eq!(config.inactivity_timeout, None);
        assert_eq!(config.keepalive_interval, Some(Duration::from_secs(30)));
        assert_eq!(config.preferred.cipher, SecurityLevel::Balanced.algorithms().cipher);
    }

    #[test]
    fn level_reads_from_snake_case_names() {
        let level: SecurityLevel =
            serde_json::from_str(r#""legacy_compatible""#).expect("decode level");
        assert_eq!(level, SecurityLevel::LegacyCompatible);
        assert_eq!(
            serde_json::to_string(&SecurityLevel::Balanced).expect("encode level"),
            r#""balanced""#
        );
    }
}
