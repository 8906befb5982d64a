//! `krb5.conf` rendering.

use serde::{Deserialize, Serialize};

/// Settings for a generated `krb5.conf`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Krb5Conf {
    pub realm: String,
    pub pkinit_anchors: String,
    pub domain: Option<String>,
    pub dotdomain: String,
    pub kdchost: String,
    pub kdcport: u16,
}

impl Krb5Conf {
    /// Render the configuration file.
    #[must_use]
    pub fn render(&self) -> String {
        let mut domain_realm = format!("    {} = {}\n", self.dotdomain, self.realm);
        if let Some(domain) = &self.domain {
            domain_realm.push_str(&format!("    {} = {}\n", domain, self.realm));
        }
        format!(
            "\
# Generated by tesserad
[logging]
    default = STDERR
[libdefaults]
    default_realm = {realm}
    dns_lookup_kdc = no
    dns_lookup_realm = no
    ignore_acceptor_hostname = yes
    dns_canonicalize_hostname = no
    rdns = no
    forwardable = true
    kuserok = SYSTEM-K5LOGIN:/etc/k5login.d
    kuserok = USER-K5LOGIN
    kuserok = SIMPLE
[appdefaults]
    pkinit_anchors = FILE:{anchors}
[domain_realm]
{domain_realm}[realms]
    {realm} = {{
        kdc = {kdchost}:{kdcport}
        pkinit_require_eku = true
        pkinit_require_krbtgt_otherName = true
        pkinit_win2k = no
        pkinit_win2k_require_binding = yes
    }}
",
            realm = self.realm,
            anchors = self.pkinit_anchors,
            domain_realm = domain_realm,
            kdchost = self.kdchost,
            kdcport = self.kdcport,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf() -> Krb5Conf {
        Krb5Conf {
            realm: "EXAMPLE.ORG".into(),
            pkinit_anchors: "/etc/ssl/ca.pem".into(),
            domain: Some("example.org".into()),
            dotdomain: ".example.org".into(),
            kdchost: "kdc.example.org".into(),
            kdcport: 88,
        }
    }

    #[test]
    fn test_render_sections() {
        let text = conf().render();
        assert!(text.contains("default_realm = EXAMPLE.ORG"));
        assert!(text.contains("pkinit_anchors = FILE:/etc/ssl/ca.pem"));
        assert!(text.contains("    .example.org = EXAMPLE.ORG\n    example.org = EXAMPLE.ORG\n"));
        assert!(text.contains("kdc = kdc.example.org:88"));
        assert!(text.contains("    EXAMPLE.ORG = {\n"));
    }

    #[test]
    fn test_render_without_domain() {
        let mut conf = conf();
        conf.domain = None;
        let text = conf.render();
        assert!(text.contains("[domain_realm]\n    .example.org = EXAMPLE.ORG\n[realms]"));
    }
}
