use std::{collections::HashSet, sync::Arc};

use crate::{
    commands::ModerationQuery, config::Config, ports::PlatformClient, retry::Retrier, Result,
};

/// Read-only moderation lookups against the configured community.
#[derive(Clone)]
pub struct Moderation {
    platform: Arc<dyn PlatformClient>,
    retrier: Retrier,
    cfg: Arc<Config>,
}

impl Moderation {
    pub fn new(platform: Arc<dyn PlatformClient>, retrier: Retrier, cfg: Arc<Config>) -> Self {
        Self {
            platform,
            retrier,
            cfg,
        }
    }

    /// Lowercased names of every user banned from the community.
    pub async fn get_banned(&self) -> Result<HashSet<String>> {
        let community = self
            .retrier
            .run_required("fetch community", || {
                self.platform.fetch_community(&self.cfg.community)
            })
            .await?;
        let names = self
            .retrier
            .run("fetch banned users", || {
                self.platform.fetch_banned_users(&community)
            })
            .await?
            .unwrap_or_default();

        Ok(names.into_iter().map(|n| n.to_lowercase()).collect())
    }

    pub async fn is_banned(&self, user: &str) -> Result<bool> {
        Ok(self.get_banned().await?.contains(&user.to_lowercase()))
    }

    /// Text reply for an operator's moderation query.
    pub async fn answer(&self, query: &ModerationQuery) -> Result<String> {
        let banned = self.get_banned().await?;
        let community = &self.cfg.community;

        Ok(match query {
            ModerationQuery::ListBanned if banned.is_empty() => {
                format!("No users are banned from r/{community}.")
            }
            ModerationQuery::ListBanned => {
                let mut names: Vec<_> = banned.into_iter().collect();
                names.sort();
                let list = names
                    .iter()
                    .map(|n| format!("* {n}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("{} users banned from r/{community}:\n\n{list}", names.len())
            }
            ModerationQuery::CheckUser(user) if banned.contains(&user.to_lowercase()) => {
                format!("{user} is banned from r/{community}.")
            }
            ModerationQuery::CheckUser(user) => {
                format!("{user} is not banned from r/{community}.")
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_config, test_retrier, Call, FakePlatform};

    fn moderation(platform: Arc<FakePlatform>) -> Moderation {
        Moderation::new(platform, test_retrier().0, test_config())
    }

    #[tokio::test]
    async fn get_banned_normalizes_case() {
        let platform = Arc::new(FakePlatform::default());
        platform.set_banned(&["TrOl1UseR"]);

        let banned = moderation(platform.clone()).get_banned().await.unwrap();

        assert_eq!(banned, HashSet::from(["trol1user".to_string()]));
        assert_eq!(
            platform.calls(),
            vec![
                Call::FetchCommunity("MySub".to_string()),
                Call::FetchBanned("MySub".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn is_banned_ignores_case() {
        let platform = Arc::new(FakePlatform::default());
        platform.set_banned(&["Spammer"]);
        let m = moderation(platform);
        assert!(m.is_banned("SPAMMER").await.unwrap());
        assert!(!m.is_banned("someone").await.unwrap());
    }

    #[tokio::test]
    async fn answers_queries() {
        let platform = Arc::new(FakePlatform::default());
        platform.set_banned(&["b", "A"]);
        let m = moderation(platform);

        let list = m.answer(&ModerationQuery::ListBanned).await.unwrap();
        assert!(list.starts_with("2 users banned from r/MySub"));
        assert!(list.find("* a").unwrap() < list.find("* b").unwrap());

        let check = m
            .answer(&ModerationQuery::CheckUser("Carl".to_string()))
            .await
            .unwrap();
        assert_eq!(check, "Carl is not banned from r/MySub.");
    }
}
