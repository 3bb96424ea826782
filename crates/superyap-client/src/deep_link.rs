use superyap_shared::constants::DEEP_LINK_PARAM;
use superyap_shared::UserId;
use tracing::warn;
use url::Url;

use crate::error::{Result, SyncError};

/// An "add me" link: the app URL with `?user={id}`.
#[derive(Debug, Clone)]
pub struct DeepLink {
    url: Url,
    target: Option<UserId>,
}

impl DeepLink {
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).map_err(|e| SyncError::InvalidLink(format!("{raw}: {e}")))?;

        let target = url
            .query_pairs()
            .find(|(name, _)| name == DEEP_LINK_PARAM)
            .and_then(|(_, value)| match UserId::new(value.as_ref()) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(error = %e, "ignoring deep link with an invalid user id");
                    None
                }
            });

        Ok(Self { url, target })
    }

    /// User the link asks to add, if any.
    pub fn target(&self) -> Option<&UserId> {
        self.target.as_ref()
    }

    /// The link with the `user` parameter removed, so reloading does not
    /// process it again. Other parameters stay in place.
    pub fn cleaned_url(&self) -> Url {
        let kept: Vec<(String, String)> = self
            .url
            .query_pairs()
            .filter(|(name, _)| name != DEEP_LINK_PARAM)
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();

        let mut url = self.url.clone();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
        url
    }
}

/// Link another user can open to add `id`.
pub fn share_url(origin: &str, id: &UserId) -> Result<Url> {
    let mut url = Url::parse(origin).map_err(|e| SyncError::InvalidLink(format!("{origin}: {e}")))?;
    url.query_pairs_mut()
        .clear()
        .append_pair(DEEP_LINK_PARAM, id.as_str());
    Ok(url)
}
