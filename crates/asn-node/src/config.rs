//! Node configuration.
//!
//! YAML, either inline (anything containing a newline) or a file path:
//!
//! ```yaml
//! name: foobar
//! lat: 37.774929
//! lon: -122.419415
//! keys:
//!   admin:
//!     pub: { encr: <hex32>, auth: <hex32> }
//!     sec: { encr: <hex32>, auth: <hex64> }
//!   server:
//!     pub: { encr: <hex32>, auth: <hex32> }
//!   nonce: <hex24>
//! server:
//! - name: Local
//!   url: unix:///var/run/asn/siren.sock
//!   lat: 181
//!   lon: 0
//! ```
//!
//! Every missing section is its own validation error so the operator sees
//! exactly which line is absent.

use std::{fs, io};

use asn_proto::{KeyError, Nonce, PubAuth, PubEncr, SecAuth, SecEncr};
use asn_repo::ServiceKeys;
use serde::Deserialize;
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required section or field is absent
    #[error("no {0}")]
    Missing(&'static str),

    /// A hex key field failed to parse
    #[error("bad {field}: {err}")]
    Key {
        /// Which field
        field: &'static str,
        /// Why it failed
        err: KeyError,
    },

    /// The document is not valid YAML
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The config file could not be read
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Deserialize)]
struct Raw {
    name: Option<String>,
    dir: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    keys: Option<RawKeys>,
    #[serde(rename = "server")]
    servers: Option<Vec<RawServer>>,
}

#[derive(Debug, Deserialize)]
struct RawKeys {
    admin: Option<RawKeyPair>,
    server: Option<RawKeyPair>,
    nonce: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawKeyPair {
    #[serde(rename = "pub")]
    public: Option<RawKeyHalves>,
    sec: Option<RawKeyHalves>,
}

#[derive(Debug, Deserialize)]
struct RawKeyHalves {
    encr: Option<String>,
    auth: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawServer {
    name: Option<String>,
    url: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
}

/// One keypair from the config: public halves mandatory, secret halves
/// present only where this node holds them.
#[derive(Debug, Clone)]
pub struct KeySet {
    /// Public encryption key
    pub pub_encr: PubEncr,
    /// Public authentication key
    pub pub_auth: PubAuth,
    /// Secret encryption key, if held
    pub sec_encr: Option<SecEncr>,
    /// Secret authentication key, if held
    pub sec_auth: Option<SecAuth>,
}

/// A configured peer server.
#[derive(Debug, Clone)]
pub struct ServerUrl {
    /// Display name
    pub name: String,
    /// Connection URL (`unix://...` or `tcp://host:port`)
    pub url: String,
    /// Geographic latitude (out-of-range means unset)
    pub lat: f64,
    /// Geographic longitude
    pub lon: f64,
}

/// Validated node configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Node name
    pub name: String,
    /// Repository directory override
    pub dir: Option<String>,
    /// Geographic latitude
    pub lat: f64,
    /// Geographic longitude
    pub lon: f64,
    /// Administrator keys (secret halves required)
    pub admin: KeySet,
    /// Server keys (secret halves optional)
    pub server: KeySet,
    /// Initial box nonce
    pub nonce: Nonce,
    /// Peer servers
    pub servers: Vec<ServerUrl>,
}

fn parse_key<T: std::str::FromStr<Err = KeyError>>(
    value: Option<&String>,
    field: &'static str,
    missing: &'static str,
) -> Result<T, ConfigError> {
    let raw = value.ok_or(ConfigError::Missing(missing))?;
    raw.parse().map_err(|err| ConfigError::Key { field, err })
}

impl Config {
    /// Load from `arg`: inline YAML when it contains a newline, otherwise a
    /// file path.
    pub fn new(arg: &str) -> Result<Self, ConfigError> {
        if arg.contains('\n') { Self::from_yaml(arg) } else { Self::load(arg) }
    }

    /// Load and validate a YAML config file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        Self::from_yaml(&fs::read_to_string(path)?)
    }

    /// Parse and validate an inline YAML document.
    pub fn from_yaml(doc: &str) -> Result<Self, ConfigError> {
        let raw: Raw = serde_yaml::from_str(doc)?;

        let name = raw.name.ok_or(ConfigError::Missing("name"))?;
        let keys = raw.keys.ok_or(ConfigError::Missing("keys"))?;

        let admin = keys.admin.ok_or(ConfigError::Missing("admin keys"))?;
        let admin_pub = admin.public.ok_or(ConfigError::Missing("admin public keys"))?;
        let admin_sec = admin.sec.ok_or(ConfigError::Missing("admin secret keys"))?;
        let admin = KeySet {
            pub_encr: parse_key(
                admin_pub.encr.as_ref(),
                "admin pub encr",
                "admin public encr key",
            )?,
            pub_auth: parse_key(
                admin_pub.auth.as_ref(),
                "admin pub auth",
                "admin public auth key",
            )?,
            sec_encr: Some(parse_key(
                admin_sec.encr.as_ref(),
                "admin sec encr",
                "admin secret encr key",
            )?),
            sec_auth: Some(parse_key(
                admin_sec.auth.as_ref(),
                "admin sec auth",
                "admin secret auth key",
            )?),
        };

        let server = keys.server.ok_or(ConfigError::Missing("server keys"))?;
        let server_pub = server.public.ok_or(ConfigError::Missing("server public keys"))?;
        let server_sec_encr = match &server.sec {
            Some(sec) => match &sec.encr {
                Some(raw) => Some(
                    raw.parse()
                        .map_err(|err| ConfigError::Key { field: "server sec encr", err })?,
                ),
                None => None,
            },
            None => None,
        };
        let server_sec_auth = match &server.sec {
            Some(sec) => match &sec.auth {
                Some(raw) => Some(
                    raw.parse()
                        .map_err(|err| ConfigError::Key { field: "server sec auth", err })?,
                ),
                None => None,
            },
            None => None,
        };
        let server = KeySet {
            pub_encr: parse_key(
                server_pub.encr.as_ref(),
                "server pub encr",
                "server public encr key",
            )?,
            pub_auth: parse_key(
                server_pub.auth.as_ref(),
                "server pub auth",
                "server public auth key",
            )?,
            sec_encr: server_sec_encr,
            sec_auth: server_sec_auth,
        };

        let nonce: Nonce = parse_key(keys.nonce.as_ref(), "nonce", "nonce")?;

        let servers = raw.servers.ok_or(ConfigError::Missing("servers"))?;
        if servers.is_empty() {
            return Err(ConfigError::Missing("servers"));
        }
        let servers = servers
            .into_iter()
            .map(|s| {
                Ok(ServerUrl {
                    name: s.name.unwrap_or_default(),
                    url: s.url.ok_or(ConfigError::Missing("server url"))?,
                    lat: s.lat.unwrap_or(181.0),
                    lon: s.lon.unwrap_or(181.0),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            name,
            dir: raw.dir,
            lat: raw.lat.unwrap_or(181.0),
            lon: raw.lon.unwrap_or(181.0),
            admin,
            server,
            nonce,
            servers,
        })
    }

    /// Keys that bypass the repository permission gate.
    #[must_use]
    pub fn service_keys(&self) -> ServiceKeys {
        ServiceKeys { admin: self.admin.pub_encr, server: self.server.pub_encr }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
name: foobar
lat: 37.774929
lon: -122.419415
keys:
  admin:
    pub:
      encr: 5fb2d5d9552c47f02d4cfc1f3938abd4c5f685b050501e53f6bf545c05982e33
      auth: 9d30799789fb96a2d71855168d8573d2ce6f367e6a0ef7da7bcee72ab31dcc13
    sec:
      encr: f6ce8a1025b3537e3a82ab5461fa7a2db51a2729abe66cdce82b54a573de011d
      auth: 60eabf950dc926735d086f419b2571de6e95c4e1d1efe179590b1acc8ffee39c9d30799789fb96a2d71855168d8573d2ce6f367e6a0ef7da7bcee72ab31dcc13
  server:
    pub:
      encr: 45236651d82a9f5b098038e0f23186cd53b7dc487a99af68c41c9a3b0e7f6d00
      auth: b37cb08f941a01d299d6609e471e7b9e43d456a5920cb9151b9ed698537882c2
  nonce: a7967df6f832bbdfc30c301ff22f3929cd4b900610541d39
server:
- name: Local
  url: unix:///var/run/asn/siren.sock
  lat: 181
  lon: 0
";

    #[test]
    fn sample_config_parses() {
        let c = Config::new(SAMPLE).unwrap();
        assert_eq!(c.name, "foobar");
        assert_eq!(c.servers.len(), 1);
        assert_eq!(c.servers[0].url, "unix:///var/run/asn/siren.sock");
        assert!(c.admin.sec_encr.is_some());
        assert!(c.server.sec_encr.is_none());
        assert_eq!(
            c.admin.pub_encr.to_hex(),
            "5fb2d5d9552c47f02d4cfc1f3938abd4c5f685b050501e53f6bf545c05982e33"
        );
    }

    /// Drop one section at a time and check the reported gap, mirroring the
    /// operator's most common misconfigurations.
    #[test]
    fn missing_sections_are_named() {
        for (expect, strip) in [
            ("no name", "name: foobar\n"),
            ("no nonce", "  nonce: a7967df6f832bbdfc30c301ff22f3929cd4b900610541d39\n"),
            (
                "no admin public encr key",
                "      encr: 5fb2d5d9552c47f02d4cfc1f3938abd4c5f685b050501e53f6bf545c05982e33\n",
            ),
            (
                "no server public auth key",
                "      auth: b37cb08f941a01d299d6609e471e7b9e43d456a5920cb9151b9ed698537882c2\n",
            ),
        ] {
            let doc = SAMPLE.replace(strip, "");
            let err = Config::new(&doc).unwrap_err();
            assert_eq!(err.to_string(), expect, "stripping {strip:?}");
        }
    }

    #[test]
    fn missing_server_list_is_an_error() {
        let doc = SAMPLE.split("\nserver:\n").next().unwrap();
        let err = Config::new(doc).unwrap_err();
        assert_eq!(err.to_string(), "no servers");
    }

    #[test]
    fn missing_admin_secrets_are_an_error() {
        let doc = SAMPLE.replace(
            "    sec:
      encr: f6ce8a1025b3537e3a82ab5461fa7a2db51a2729abe66cdce82b54a573de011d
      auth: 60eabf950dc926735d086f419b2571de6e95c4e1d1efe179590b1acc8ffee39c9d30799789fb96a2d71855168d8573d2ce6f367e6a0ef7da7bcee72ab31dcc13
",
            "",
        );
        let err = Config::new(&doc).unwrap_err();
        assert_eq!(err.to_string(), "no admin secret keys");
    }

    #[test]
    fn bad_hex_is_a_key_error() {
        let doc = SAMPLE.replace(
            "a7967df6f832bbdfc30c301ff22f3929cd4b900610541d39",
            "not-hex-at-all",
        );
        let err = Config::new(&doc).unwrap_err();
        assert!(matches!(err, ConfigError::Key { field: "nonce", .. }));
    }
}
