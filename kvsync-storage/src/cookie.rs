//! Cookie-backed store.
//!
//! [`CookieJar`] models a `document.cookie` style jar: writers send
//! `Set-Cookie`-like instructions, readers see a `k=v; k2=v2` string of the
//! live cookies. [`CookieStore`] is the raw store on top of it. It has no
//! native change events, so external writers (anything calling the jar
//! directly) are found by diffing the jar string on each poll.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use kvsync_core::{Expiry, KvSyncResult, StorageError};

use crate::change::{diff_entries, RawChange};
use crate::raw::RawStore;

/// Expiry written for [`Expiry::Lifetime`] cookies.
pub const LIFETIME_EXPIRY: &str = "Fri, 18 Dec 2099 12:00:00 GMT";

/// Expiry written to delete a cookie.
pub const EPOCH_EXPIRY: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

#[derive(Debug, Clone)]
struct Cookie {
    value: String,
    expires: Option<DateTime<Utc>>,
}

/// A single-host cookie jar.
#[derive(Debug)]
pub struct CookieJar {
    hostname: String,
    cookies: Mutex<BTreeMap<String, Cookie>>,
}

impl CookieJar {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            cookies: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The live cookies as a `k=v; k2=v2` string.
    pub fn document_cookie(&self) -> String {
        let now = Utc::now();
        let cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
        cookies
            .iter()
            .filter(|(_, c)| c.expires.map_or(true, |at| at > now))
            .map(|(k, c)| format!("{}={}", k, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Apply a cookie instruction such as `k=v; expires=...; path=/; domain=x`.
    ///
    /// An expiry in the past deletes the cookie. The jar serves a single
    /// host, so `domain` and `path` are ignored along with unknown or
    /// malformed attributes.
    pub fn apply(&self, instruction: &str) -> KvSyncResult<()> {
        let mut parts = instruction.split(';');
        let pair = parts.next().unwrap_or_default().trim();
        let Some((name, value)) = pair.split_once('=') else {
            return Err(StorageError::WriteRejected {
                backend: "cookies".to_string(),
                key: pair.to_string(),
                reason: "cookie instruction has no name=value pair".to_string(),
            }
            .into());
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(StorageError::WriteRejected {
                backend: "cookies".to_string(),
                key: String::new(),
                reason: "cookie name is empty".to_string(),
            }
            .into());
        }

        let mut expires = None;
        for attribute in parts {
            let Some((attr, attr_value)) = attribute.trim().split_once('=') else {
                continue;
            };
            if attr.trim().eq_ignore_ascii_case("expires") {
                expires = DateTime::parse_from_rfc2822(attr_value.trim())
                    .ok()
                    .map(|at| at.with_timezone(&Utc));
            }
        }

        let mut cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
        if expires.is_some_and(|at| at <= Utc::now()) {
            cookies.remove(name);
        } else {
            cookies.insert(
                name.to_string(),
                Cookie {
                    value: value.to_string(),
                    expires,
                },
            );
        }
        Ok(())
    }

    /// Set a session cookie directly, as another script on the page would.
    pub fn set(&self, name: &str, value: &str) -> KvSyncResult<()> {
        self.apply(&format!("{}={};path=/", name, value))
    }
}

/// Parse a `k=v; k2=v2` cookie string. A part without `=` maps to itself.
pub fn parse_cookie_string(cookie_string: &str) -> BTreeMap<String, String> {
    cookie_string
        .split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (part.to_string(), part.to_string()),
        })
        .collect()
}

/// Resolve the cookie `domain` attribute for a scope.
///
/// ```text
/// domain.com     + "."    = .domain.com
/// domain.com     + ".sub." = .sub.domain.com
/// www.domain.com + "sub." = www.sub.domain.com
/// localhost      + "."    = (none)
/// ```
pub fn resolve_domain(scope: &str, hostname: &str) -> String {
    if scope.is_empty() || !hostname.contains('.') {
        return String::new();
    }
    let www = if !scope.starts_with('.') && hostname.starts_with("www.") {
        "www."
    } else {
        ""
    };
    format!("{}{}{}", www, scope, registrable_domain(hostname))
}

fn registrable_domain(hostname: &str) -> String {
    let labels: Vec<&str> = hostname.split('.').collect();
    let start = labels.len().saturating_sub(2);
    labels[start..].join(".")
}

fn format_expiry(expires: Option<&Expiry>) -> String {
    match expires {
        Some(Expiry::At(at)) => format!("; expires={}", at.format("%a, %d %b %Y %H:%M:%S GMT")),
        Some(Expiry::Lifetime) => format!("; expires={}", LIFETIME_EXPIRY),
        None => String::new(),
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    cookie_string: Option<String>,
    items: BTreeMap<String, String>,
}

/// Raw store writing cookies into a [`CookieJar`].
#[derive(Debug)]
pub struct CookieStore {
    jar: Arc<CookieJar>,
    scope: String,
    snapshot: Mutex<Snapshot>,
}

impl CookieStore {
    pub fn new(jar: Arc<CookieJar>, scope: impl Into<String>) -> Self {
        let cookie_string = jar.document_cookie();
        let items = parse_cookie_string(&cookie_string);
        Self {
            jar,
            scope: scope.into(),
            snapshot: Mutex::new(Snapshot {
                cookie_string: Some(cookie_string),
                items,
            }),
        }
    }

    pub fn jar(&self) -> &Arc<CookieJar> {
        &self.jar
    }

    fn domain_attribute(&self) -> String {
        let domain = resolve_domain(&self.scope, self.jar.hostname());
        if domain.is_empty() {
            String::new()
        } else {
            format!("domain={};", domain)
        }
    }

    fn current_items(&self) -> BTreeMap<String, String> {
        parse_cookie_string(&self.jar.document_cookie())
    }
}

impl RawStore for CookieStore {
    type Item = String;

    fn kind(&self) -> &str {
        "cookies"
    }

    fn get_item(&self, storage_key: &str) -> Option<String> {
        self.current_items().remove(storage_key)
    }

    fn set_item(
        &self,
        storage_key: &str,
        item: String,
        expires: Option<&Expiry>,
    ) -> KvSyncResult<()> {
        let instruction = format!(
            "{}={}{};path=/;{}",
            storage_key,
            item,
            format_expiry(expires),
            self.domain_attribute()
        );
        tracing::trace!(instruction = %instruction, "Cookie set instruction");
        self.jar.apply(&instruction)?;

        // Own writes are recorded so polling does not report them as external.
        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        snapshot.items.insert(storage_key.to_string(), item);
        Ok(())
    }

    fn remove_item(&self, storage_key: &str) -> KvSyncResult<()> {
        let instruction = format!(
            "{}=; expires={}; path=/;{}",
            storage_key,
            EPOCH_EXPIRY,
            self.domain_attribute()
        );
        self.jar.apply(&instruction)?;

        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        snapshot.items.remove(storage_key);
        Ok(())
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.current_items().into_iter().collect()
    }

    fn poll_external(&self) -> Vec<RawChange<String>> {
        let cookie_string = self.jar.document_cookie();
        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        if snapshot.cookie_string.as_deref() == Some(cookie_string.as_str()) {
            return Vec::new();
        }

        let items = parse_cookie_string(&cookie_string);
        let changes = diff_entries(&snapshot.items, &items);
        snapshot.cookie_string = Some(cookie_string);
        snapshot.items = items;
        changes
    }
}
