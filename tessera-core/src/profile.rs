//! Per-host enrollment profiles.
//!
//! A profile is JSON stored beside each enrollment record. It is parsed into a
//! closed list of [`Directive`]s, each carrying the fields it needs, so a
//! profile that names an unknown certificate kind or leaves out a realm is
//! rejected when the host is enrolled rather than when it attests.
//!
//! ```json
//! {
//!   "certgen": ["https-server", "pkinit-kdc"],
//!   "realm": "EXAMPLE.ORG",
//!   "hostname": "kdc1.example.org",
//!   "ktgen": { "api": "https://kdc.example.org", "host": "host/kdc1.example.org" }
//! }
//! ```

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::archive::MAX_MEMBERS;
use crate::cert::{CaRole, CertKind, CertRequest, CertType};
use crate::krb5::Krb5Conf;
use crate::manifest::{validate_name, ManifestError};

/// Default certificate lifetime.
pub const DEFAULT_LIFETIME: &str = "1d";
/// Default key algorithm.
pub const DEFAULT_KEY_TYPE: &str = "rsa";
/// Default key size.
pub const DEFAULT_KEY_BITS: u32 = 2048;
/// Most assets one profile may yield; the manifest takes the last archive slot.
pub const MAX_ASSETS: usize = MAX_MEMBERS - 1;
/// Client name used when a profile lists none.
pub const DEFAULT_CLIENT: &str = "nobody";

/// Errors from profile parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ProfileError {
    /// Not JSON, an unknown key, or an unknown certificate kind.
    #[error("invalid profile: {0}")]
    Json(String),

    /// A directive is missing a field it requires.
    #[error("{directive} requires {field}")]
    MissingField {
        directive: &'static str,
        field: &'static str,
    },

    /// The lifetime is not `<digits><unit>`.
    #[error("invalid lifetime {0:?}")]
    InvalidLifetime(String),

    /// A directive would produce an unusable asset name.
    #[error(transparent)]
    Name(#[from] ManifestError),

    /// More assets than one archive can carry.
    #[error("profile yields {0} assets, at most {MAX_ASSETS} allowed")]
    TooManyAssets(usize),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct RawProfile {
    #[serde(default)]
    certgen: Vec<CertKind>,
    realm: Option<String>,
    hostname: Option<String>,
    https_server_hostnames: Option<Vec<String>>,
    https_clients: Option<Vec<String>>,
    pkinit_clients: Option<Vec<String>>,
    lifetime: Option<String>,
    key_type: Option<String>,
    key_bits: Option<u32>,
    krb5conf: Option<RawKrb5Conf>,
    ktgen: Option<RawKtgen>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawKrb5Conf {
    pkinit_anchors: String,
    domain: Option<String>,
    dotdomain: String,
    kdchost: String,
    kdcport: Port,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Port {
    Number(u16),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawKtgen {
    api: String,
    #[serde(flatten)]
    keytabs: BTreeMap<String, Principals>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Principals {
    One(String),
    Many(Vec<String>),
}

impl Principals {
    fn into_vec(self) -> Vec<String> {
        match self {
            Principals::One(p) => vec![p],
            Principals::Many(ps) => ps,
        }
    }
}

/// Certificate lifetime in the profile's notation plus its value in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifetime {
    pub text: String,
    pub secs: u64,
}

impl Lifetime {
    /// Parse `"90s"`, `"30m"`, `"12h"`, `"1d"`, `"2w"` or `"1y"`.
    ///
    /// A bare number is read as seconds.
    ///
    /// # Errors
    ///
    /// Returns `ProfileError::InvalidLifetime` for anything else, including zero.
    pub fn parse(s: &str) -> Result<Self, ProfileError> {
        let text = s.trim();
        let invalid = || ProfileError::InvalidLifetime(s.to_string());

        let (num, unit) = match text.char_indices().last() {
            Some((i, c)) if c.is_ascii_alphabetic() => (&text[..i], c),
            Some(_) => (text, 's'),
            None => return Err(invalid()),
        };
        let scale: u64 = match unit {
            's' => 1,
            'm' => 60,
            'h' => 3_600,
            'd' => 86_400,
            'w' => 604_800,
            'y' => 31_536_000,
            _ => return Err(invalid()),
        };
        if num.is_empty() || !num.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let n: u64 = num.parse().map_err(|_| invalid())?;
        if n == 0 {
            return Err(invalid());
        }
        Ok(Self {
            text: text.to_string(),
            secs: n.saturating_mul(scale),
        })
    }
}

/// Key and lifetime settings shared by every certificate in a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertSettings {
    pub lifetime: Lifetime,
    pub key_type: String,
    pub key_bits: u32,
}

impl Default for CertSettings {
    fn default() -> Self {
        Self {
            lifetime: Lifetime {
                text: DEFAULT_LIFETIME.to_string(),
                secs: 86_400,
            },
            key_type: DEFAULT_KEY_TYPE.to_string(),
            key_bits: DEFAULT_KEY_BITS,
        }
    }
}

/// One unit of work a profile asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    HttpsServer { hostnames: Vec<String> },
    HttpsClient { clients: Vec<String> },
    PkinitClient { realm: String, clients: Vec<String> },
    PkinitKdc { realm: String },
    PkinitIprop { realm: String, hostname: String },
    Krb5Conf(Krb5Conf),
    Keytab { api: String, name: String, principals: Vec<String> },
}

impl Directive {
    /// Names of the assets this directive produces, in order.
    #[must_use]
    pub fn asset_names(&self) -> Vec<String> {
        match self {
            Directive::HttpsServer { hostnames } => hostnames
                .iter()
                .map(|h| format!("https-server-{h}.pem"))
                .collect(),
            Directive::HttpsClient { clients } => clients
                .iter()
                .map(|c| format!("https-client-{c}.pem"))
                .collect(),
            Directive::PkinitClient { clients, .. } => clients
                .iter()
                .map(|c| format!("pkinit-client-{c}.pem"))
                .collect(),
            Directive::PkinitKdc { realm } => vec![format!("pkinit-kdc-{realm}.pem")],
            Directive::PkinitIprop { realm, .. } => vec![format!("pkinit-iprop-{realm}.pem")],
            Directive::Krb5Conf(_) => vec!["krb5.conf".to_string()],
            Directive::Keytab { name, .. } => vec![format!("keytab-{name}")],
        }
    }
}

/// Server-side values that are not part of a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanContext {
    /// Mail domain for HTTPS client certificates.
    pub domain: String,
}

/// How a planned asset is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    Certificate(CertRequest),
    Rendered(Vec<u8>),
    Keytab { api: String, principals: Vec<String> },
}

/// A single asset to generate and seal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSpec {
    pub name: String,
    pub public: bool,
    pub source: AssetSource,
}

/// A validated profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub directives: Vec<Directive>,
    pub certs: CertSettings,
}

impl Profile {
    /// Parse and validate profile JSON.
    ///
    /// # Errors
    ///
    /// See [`ProfileError`].
    pub fn parse(json: &str) -> Result<Self, ProfileError> {
        let raw: RawProfile =
            serde_json::from_str(json).map_err(|e| ProfileError::Json(e.to_string()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawProfile) -> Result<Self, ProfileError> {
        let certs = CertSettings {
            lifetime: match &raw.lifetime {
                Some(text) => Lifetime::parse(text)?,
                None => CertSettings::default().lifetime,
            },
            key_type: raw.key_type.unwrap_or_else(|| DEFAULT_KEY_TYPE.to_string()),
            key_bits: raw.key_bits.unwrap_or(DEFAULT_KEY_BITS),
        };
        let realm = |directive| {
            raw.realm.clone().ok_or(ProfileError::MissingField {
                directive,
                field: "realm",
            })
        };
        let clients = |list: &Option<Vec<String>>| {
            list.clone()
                .unwrap_or_else(|| vec![DEFAULT_CLIENT.to_string()])
        };

        let mut directives = Vec::new();
        for kind in &raw.certgen {
            let directive = match kind {
                CertKind::HttpsServer => {
                    let hostnames = match (&raw.https_server_hostnames, &raw.hostname) {
                        (Some(list), _) => list.clone(),
                        (None, Some(h)) => vec![h.clone()],
                        (None, None) => {
                            return Err(ProfileError::MissingField {
                                directive: "https-server",
                                field: "hostname",
                            })
                        }
                    };
                    Directive::HttpsServer { hostnames }
                }
                CertKind::HttpsClient => Directive::HttpsClient {
                    clients: clients(&raw.https_clients),
                },
                CertKind::PkinitClient => Directive::PkinitClient {
                    realm: realm("pkinit-client")?,
                    clients: clients(&raw.pkinit_clients),
                },
                CertKind::PkinitKdc => Directive::PkinitKdc {
                    realm: realm("pkinit-kdc")?,
                },
                CertKind::PkinitIprop => Directive::PkinitIprop {
                    realm: realm("pkinit-iprop")?,
                    hostname: raw.hostname.clone().ok_or(ProfileError::MissingField {
                        directive: "pkinit-iprop",
                        field: "hostname",
                    })?,
                },
            };
            directives.push(directive);
        }

        if let Some(conf) = raw.krb5conf {
            let kdcport = match conf.kdcport {
                Port::Number(n) => n,
                Port::Text(s) => s
                    .trim()
                    .parse()
                    .map_err(|_| ProfileError::Json(format!("invalid kdcport {s:?}")))?,
            };
            directives.push(Directive::Krb5Conf(Krb5Conf {
                realm: realm("krb5conf")?,
                pkinit_anchors: conf.pkinit_anchors,
                domain: conf.domain,
                dotdomain: conf.dotdomain,
                kdchost: conf.kdchost,
                kdcport,
            }));
        }

        if let Some(ktgen) = raw.ktgen {
            for (name, principals) in ktgen.keytabs {
                directives.push(Directive::Keytab {
                    api: ktgen.api.clone(),
                    name,
                    principals: principals.into_vec(),
                });
            }
        }

        let mut seen = HashSet::new();
        for name in directives.iter().flat_map(Directive::asset_names) {
            validate_name(&name)?;
            if !seen.insert(name.clone()) {
                return Err(ManifestError::Duplicate(name).into());
            }
        }
        if seen.len() > MAX_ASSETS {
            return Err(ProfileError::TooManyAssets(seen.len()));
        }

        Ok(Self { directives, certs })
    }

    /// Expand the directives into concrete assets, in output order.
    #[must_use]
    pub fn plan(&self, ctx: &PlanContext) -> Vec<AssetSpec> {
        let mut assets = Vec::new();
        for directive in &self.directives {
            match directive {
                Directive::HttpsServer { hostnames } => {
                    for host in hostnames {
                        let mut req = self.request(CertType::HttpsServer, CaRole::Default);
                        req.hostname = Some(host.clone());
                        req.subject = Some(format!("UID={host}"));
                        assets.push(secret(format!("https-server-{host}.pem"), req));
                    }
                }
                Directive::HttpsClient { clients } => {
                    for client in clients {
                        let mut req = self.request(CertType::HttpsClient, CaRole::HttpsClient);
                        req.subject = Some(format!("UID={client}"));
                        req.email = Some(format!("{client}@{}", ctx.domain));
                        assets.push(secret(format!("https-client-{client}.pem"), req));
                    }
                }
                Directive::PkinitClient { realm, clients } => {
                    for client in clients {
                        let mut req = self.request(CertType::PkinitClient, CaRole::Default);
                        req.subject = Some(format!("UID={client}"));
                        req.principal = Some(format!("{client}@{realm}"));
                        assets.push(secret(format!("pkinit-client-{client}.pem"), req));
                    }
                }
                Directive::PkinitKdc { realm } => {
                    let mut req = self.request(CertType::PkinitKdc, CaRole::Default);
                    req.subject = Some("UID=default".to_string());
                    req.principal = Some(format!("krbtgt/{realm}@{realm}"));
                    assets.push(secret(format!("pkinit-kdc-{realm}.pem"), req));
                }
                Directive::PkinitIprop { realm, hostname } => {
                    let mut req = self.request(CertType::PkinitClient, CaRole::Default);
                    req.subject = Some("CN=iprop".to_string());
                    req.principal = Some(format!("iprop/{hostname}@{realm}"));
                    assets.push(secret(format!("pkinit-iprop-{realm}.pem"), req));
                }
                Directive::Krb5Conf(conf) => assets.push(AssetSpec {
                    name: "krb5.conf".to_string(),
                    public: true,
                    source: AssetSource::Rendered(conf.render().into_bytes()),
                }),
                Directive::Keytab {
                    api,
                    name,
                    principals,
                } => assets.push(AssetSpec {
                    name: format!("keytab-{name}"),
                    public: false,
                    source: AssetSource::Keytab {
                        api: api.clone(),
                        principals: principals.clone(),
                    },
                }),
            }
        }
        assets
    }

    fn request(&self, cert_type: CertType, ca: CaRole) -> CertRequest {
        CertRequest {
            cert_type,
            ca,
            lifetime: self.certs.lifetime.text.clone(),
            lifetime_secs: self.certs.lifetime.secs,
            key_type: self.certs.key_type.clone(),
            key_bits: self.certs.key_bits,
            hostname: None,
            subject: None,
            email: None,
            principal: None,
        }
    }
}

fn secret(name: String, req: CertRequest) -> AssetSpec {
    AssetSpec {
        name,
        public: false,
        source: AssetSource::Certificate(req),
    }
}
