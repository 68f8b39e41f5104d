use std::{collections::HashMap, path::PathBuf};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use regex::Regex;
use serde::Serialize;
use snafu::{GenerateImplicitData, Location};
use tracing::{error, info};

use crate::{
    error::BrokerError,
    types::{looks_logged_in, normalize_domain, Cookie},
};

/// Messages the credential store actor accepts. Shaped after the teacher's
/// `CookieActorMessage`: one variant per public operation, replies carried
/// on an `RpcReplyPort` for calls, fire-and-forget for casts.
#[derive(Debug)]
enum StoreMessage {
    GetAll(RpcReplyPort<StoreSnapshot>),
    GetForDomains(Vec<String>, RpcReplyPort<Vec<Cookie>>),
    ListDomains(RpcReplyPort<Vec<DomainInfo>>),
    AdminReplace(Vec<Cookie>, Option<bool>, RpcReplyPort<Result<(), BrokerError>>),
    AdminMerge(Vec<Cookie>, RpcReplyPort<Result<(), BrokerError>>),
    AdminDelete(Vec<(String, String, String)>, RpcReplyPort<Result<(), BrokerError>>),
    AdminClear(RpcReplyPort<Result<(), BrokerError>>),
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot {
    pub cookies: Vec<Cookie>,
    pub logged_in: bool,
    pub last_updated: DateTime<Utc>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DomainInfo {
    pub domain: String,
    pub cookie_count: usize,
}

#[derive(Debug)]
struct StoreState {
    cookies: Vec<Cookie>,
    domain_index: HashMap<String, usize>,
    logged_in: bool,
    last_updated: DateTime<Utc>,
    data_dir: PathBuf,
}

impl StoreState {
    fn rebuild_index(&mut self) {
        self.domain_index.clear();
        for c in &self.cookies {
            *self
                .domain_index
                .entry(normalize_domain(&c.domain))
                .or_insert(0) += 1;
        }
        self.logged_in = looks_logged_in(&self.cookies);
    }
}

struct StoreActor;

impl StoreActor {
    fn persist(state: &StoreState) {
        let snapshot = StoreSnapshot {
            cookies: state.cookies.clone(),
            logged_in: state.logged_in,
            last_updated: state.last_updated,
            count: state.cookies.len(),
        };
        let data_dir = state.data_dir.clone();
        let domain_index = state.domain_index.clone();
        let cookies = state.cookies.clone();
        tokio::spawn(async move {
            if let Err(e) = persist_to_disk(&data_dir, &snapshot, &domain_index, &cookies).await {
                error!("failed to persist credential store: {e}");
            } else {
                info!("credential store persisted ({} cookies)", snapshot.count);
            }
        });
    }
}

async fn persist_to_disk(
    data_dir: &std::path::Path,
    snapshot: &StoreSnapshot,
    domain_index: &HashMap<String, usize>,
    cookies: &[Cookie],
) -> std::io::Result<()> {
    tokio::fs::create_dir_all(data_dir).await?;

    let main = serde_json::json!({
        "cookies": snapshot.cookies,
        "logged_in": snapshot.logged_in,
        "last_updated": snapshot.last_updated,
        "count": snapshot.count,
        "available_domains": domain_index,
        "timestamp": Utc::now(),
    });
    tokio::fs::write(
        data_dir.join("shared_cookies.json"),
        serde_json::to_vec_pretty(&main).unwrap_or_default(),
    )
    .await?;

    let sanitize = domain_sanitizer();
    let by_domain: HashMap<String, Vec<&Cookie>> = cookies
        .iter()
        .map(|c| (normalize_domain(&c.domain), c))
        .into_group_map();
    for (domain, cookies) in by_domain {
        let safe = sanitize.replace_all(&domain, "_");
        let shard = serde_json::json!({ "domain": domain, "cookies": cookies });
        tokio::fs::write(
            data_dir.join(format!("{safe}_cookies.json")),
            serde_json::to_vec_pretty(&shard).unwrap_or_default(),
        )
        .await?;
    }
    Ok(())
}

fn domain_sanitizer() -> Regex {
    Regex::new(r"[^\w\-._]").expect("static regex")
}

impl Actor for StoreActor {
    type Msg = StoreMessage;
    type State = StoreState;
    type Arguments = PathBuf;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        data_dir: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let loaded = load_from_disk(&data_dir).unwrap_or_default();
        let mut state = StoreState {
            cookies: loaded,
            domain_index: HashMap::new(),
            logged_in: false,
            last_updated: Utc::now(),
            data_dir,
        };
        state.rebuild_index();
        info!(
            "credential store started with {} cookies across {} domains",
            state.cookies.len(),
            state.domain_index.len()
        );
        Ok(state)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            StoreMessage::GetAll(reply) => {
                reply.send(StoreSnapshot {
                    cookies: state.cookies.clone(),
                    logged_in: state.logged_in,
                    last_updated: state.last_updated,
                    count: state.cookies.len(),
                })?;
            }
            StoreMessage::GetForDomains(domains, reply) => {
                let wanted: std::collections::HashSet<String> =
                    domains.iter().map(|d| normalize_domain(d)).collect();
                let matched = state
                    .cookies
                    .iter()
                    .filter(|c| wanted.contains(&normalize_domain(&c.domain)))
                    .cloned()
                    .collect();
                reply.send(matched)?;
            }
            StoreMessage::ListDomains(reply) => {
                let mut domains: Vec<DomainInfo> = state
                    .domain_index
                    .iter()
                    .map(|(domain, count)| DomainInfo {
                        domain: domain.clone(),
                        cookie_count: *count,
                    })
                    .collect();
                domains.sort_by(|a, b| a.domain.cmp(&b.domain));
                reply.send(domains)?;
            }
            StoreMessage::AdminReplace(cookies, logged_in, reply) => {
                for c in &cookies {
                    if c.name.is_empty() || c.domain.is_empty() {
                        reply.send(Err(BrokerError::MalformedInput(
                            "cookie missing name or domain".into(),
                        )))?;
                        return Ok(());
                    }
                }
                state.cookies = cookies;
                state.rebuild_index();
                if let Some(explicit) = logged_in {
                    state.logged_in = explicit;
                }
                state.last_updated = Utc::now();
                Self::persist(state);
                reply.send(Ok(()))?;
            }
            StoreMessage::AdminMerge(new_cookies, reply) => {
                for c in &new_cookies {
                    if c.name.is_empty() || c.domain.is_empty() {
                        reply.send(Err(BrokerError::MalformedInput(
                            "cookie missing name or domain".into(),
                        )))?;
                        return Ok(());
                    }
                }
                for incoming in new_cookies {
                    let key = incoming.key();
                    if let Some(existing) = state.cookies.iter_mut().find(|c| c.key() == key) {
                        *existing = incoming;
                    } else {
                        state.cookies.push(incoming);
                    }
                }
                state.rebuild_index();
                state.last_updated = Utc::now();
                Self::persist(state);
                reply.send(Ok(()))?;
            }
            StoreMessage::AdminDelete(keys, reply) => {
                let keys: std::collections::HashSet<_> = keys
                    .into_iter()
                    .map(|(n, d, p)| (n, normalize_domain(&d), p))
                    .collect();
                state.cookies.retain(|c| !keys.contains(&c.key()));
                state.rebuild_index();
                if state.cookies.is_empty() {
                    state.logged_in = false;
                }
                state.last_updated = Utc::now();
                Self::persist(state);
                reply.send(Ok(()))?;
            }
            StoreMessage::AdminClear(reply) => {
                state.cookies.clear();
                state.domain_index.clear();
                state.logged_in = false;
                state.last_updated = Utc::now();
                Self::persist(state);
                reply.send(Ok(()))?;
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        Self::persist(state);
        Ok(())
    }
}

fn load_from_disk(data_dir: &std::path::Path) -> Option<Vec<Cookie>> {
    let path = data_dir.join("shared_cookies.json");
    let text = std::fs::read_to_string(path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&text).ok()?;
    let cookies = value.get("cookies")?.clone();
    serde_json::from_value(cookies).ok()
}

/// Handle for interacting with the credential store actor.
#[derive(Clone)]
pub struct StoreHandle {
    actor_ref: ActorRef<StoreMessage>,
}

impl StoreHandle {
    pub async fn start(data_dir: PathBuf) -> Result<Self, ractor::SpawnErr> {
        let (actor_ref, _join_handle) = Actor::spawn(None, StoreActor, data_dir).await?;
        Ok(Self { actor_ref })
    }

    fn wrap(op: &'static str, e: impl std::fmt::Display) -> BrokerError {
        BrokerError::RactorError {
            loc: Location::generate(),
            msg: format!("failed to communicate with StoreActor for {op}: {e}"),
        }
    }

    pub async fn get_all(&self) -> Result<StoreSnapshot, BrokerError> {
        ractor::call!(self.actor_ref, StoreMessage::GetAll)
            .map_err(|e| Self::wrap("get_all", e))
    }

    pub async fn get_for_domains(&self, domains: Vec<String>) -> Result<Vec<Cookie>, BrokerError> {
        ractor::call!(self.actor_ref, StoreMessage::GetForDomains, domains)
            .map_err(|e| Self::wrap("get_for_domains", e))
    }

    pub async fn list_domains(&self) -> Result<Vec<DomainInfo>, BrokerError> {
        ractor::call!(self.actor_ref, StoreMessage::ListDomains)
            .map_err(|e| Self::wrap("list_domains", e))
    }

    pub async fn admin_replace(
        &self,
        cookies: Vec<Cookie>,
        logged_in: Option<bool>,
    ) -> Result<(), BrokerError> {
        ractor::call!(self.actor_ref, StoreMessage::AdminReplace, cookies, logged_in)
            .map_err(|e| Self::wrap("admin_replace", e))?
    }

    pub async fn admin_merge(&self, cookies: Vec<Cookie>) -> Result<(), BrokerError> {
        ractor::call!(self.actor_ref, StoreMessage::AdminMerge, cookies)
            .map_err(|e| Self::wrap("admin_merge", e))?
    }

    pub async fn admin_delete(
        &self,
        keys: Vec<(String, String, String)>,
    ) -> Result<(), BrokerError> {
        ractor::call!(self.actor_ref, StoreMessage::AdminDelete, keys)
            .map_err(|e| Self::wrap("admin_delete", e))?
    }

    pub async fn admin_clear(&self) -> Result<(), BrokerError> {
        ractor::call!(self.actor_ref, StoreMessage::AdminClear)
            .map_err(|e| Self::wrap("admin_clear", e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, domain: &str) -> Cookie {
        Cookie {
            name: name.into(),
            value: "v".into(),
            domain: domain.into(),
            path: "/".into(),
            secure: true,
            http_only: true,
            same_site: None,
            expires: None,
        }
    }

    #[tokio::test]
    async fn replace_then_merge_prefers_new_value() {
        let dir = tempdir();
        let handle = StoreHandle::start(dir.clone()).await.unwrap();
        handle
            .admin_replace(vec![cookie("session_id", "a.com")], None)
            .await
            .unwrap();
        let mut updated = cookie("session_id", "a.com");
        updated.value = "new".into();
        handle.admin_merge(vec![updated]).await.unwrap();
        let snapshot = handle.get_all().await.unwrap();
        assert_eq!(snapshot.cookies.len(), 1);
        assert_eq!(snapshot.cookies[0].value, "new");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn domain_index_sums_to_cookie_count() {
        let dir = tempdir();
        let handle = StoreHandle::start(dir.clone()).await.unwrap();
        handle
            .admin_replace(
                vec![cookie("a", "x.com"), cookie("b", "x.com"), cookie("c", "y.com")],
                None,
            )
            .await
            .unwrap();
        let domains = handle.list_domains().await.unwrap();
        let total: usize = domains.iter().map(|d| d.cookie_count).sum();
        assert_eq!(total, 3);
        let _ = std::fs::remove_dir_all(dir);
    }

    fn tempdir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("credbroker-test-{}", uuid::Uuid::new_v4()));
        dir
    }
}
