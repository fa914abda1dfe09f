mod client;

pub use client::{
    ConversationList, HttpSiteApi, ListEntry, PeerInfo, SiteApi, Thread, ThreadMessage,
};

/// How a site's current user id is discovered. The upstream forums expose no
/// "who am I" endpoint, so the id is reverse-derived from message traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserIdStrategy {
    /// Infer from the conversation list, falling back to probing a fixed
    /// conversation and reading its receiver side.
    InferWithProbe,
    /// Inference only, no fallback probe.
    InferOnly,
}

/// Static description of a supported forum. Data only; behavioral variation
/// is limited to the closed [`UserIdStrategy`] set.
#[derive(Debug, Clone, Copy)]
pub struct SiteDescriptor {
    pub id: &'static str,
    pub label: &'static str,
    pub host: &'static str,
    pub user_id_strategy: UserIdStrategy,
}

pub const SITES: &[SiteDescriptor] = &[
    SiteDescriptor {
        id: "ns",
        label: "NodeSeek",
        host: "www.nodeseek.com",
        user_id_strategy: UserIdStrategy::InferWithProbe,
    },
    SiteDescriptor {
        id: "df",
        label: "DeepFlood",
        host: "www.deepflood.com",
        user_id_strategy: UserIdStrategy::InferOnly,
    },
];

impl SiteDescriptor {
    pub fn by_id(id: &str) -> Option<&'static SiteDescriptor> {
        SITES.iter().find(|site| site.id == id)
    }

    pub fn api_base(&self) -> String {
        format!("https://{}/api", self.host)
    }

    pub fn referer(&self) -> String {
        format!("https://{}/", self.host)
    }

    pub fn avatar_url(&self, member_id: i64) -> String {
        format!("https://{}/avatar/{member_id}.png", self.host)
    }

    pub fn chat_url(&self, member_id: i64) -> String {
        format!(
            "https://{}/notification#/message?mode=talk&to={member_id}",
            self.host
        )
    }
}
