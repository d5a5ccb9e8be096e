use std::collections::HashMap;

use parley_storage::{ProfileRecord, ProfileStore, UserId};

pub const PLACEHOLDER_DISPLAY_NAME: &str = "Unknown user";

/// Display identity for one user, resolved from the `profiles` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl UserIdentity {
    pub fn placeholder(id: UserId, placeholder_name: &str) -> Self {
        Self {
            id,
            display_name: placeholder_name.to_string(),
            avatar_url: None,
        }
    }

    pub fn from_profile(profile: ProfileRecord, placeholder_name: &str) -> Self {
        let display_name = profile
            .username
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| placeholder_name.to_string());
        let avatar_url = profile
            .avatar_url
            .filter(|url| !url.trim().is_empty());

        Self {
            id: profile.id,
            display_name,
            avatar_url,
        }
    }

    /// Avatar fallback glyph.
    pub fn initial(&self) -> char {
        self.display_name
            .chars()
            .next()
            .map(|character| character.to_uppercase().next().unwrap_or(character))
            .unwrap_or('?')
    }
}

/// Maps user ids to display identities.
///
/// Nothing is cached; every call reads the store so renamed profiles show up on the next refresh.
#[derive(Debug, Clone)]
pub struct ProfileResolver {
    placeholder_name: String,
}

impl Default for ProfileResolver {
    fn default() -> Self {
        Self::new(PLACEHOLDER_DISPLAY_NAME)
    }
}

impl ProfileResolver {
    pub fn new(placeholder_name: impl Into<String>) -> Self {
        let placeholder_name = placeholder_name.into();
        let placeholder_name = if placeholder_name.trim().is_empty() {
            PLACEHOLDER_DISPLAY_NAME.to_string()
        } else {
            placeholder_name.trim().to_string()
        };
        Self { placeholder_name }
    }

    pub fn placeholder_name(&self) -> &str {
        &self.placeholder_name
    }

    /// Returns an identity for every requested id.
    ///
    /// Missing rows and failed lookups both resolve to the placeholder name.
    pub async fn resolve_many<S>(&self, store: &S, ids: &[UserId]) -> HashMap<UserId, UserIdentity>
    where
        S: ProfileStore + ?Sized,
    {
        let mut unique = ids.to_vec();
        unique.sort();
        unique.dedup();

        let mut resolved = HashMap::with_capacity(unique.len());
        if unique.is_empty() {
            return resolved;
        }

        match store.query_profiles(unique.clone()).await {
            Ok(profiles) => {
                for profile in profiles {
                    resolved.insert(
                        profile.id,
                        UserIdentity::from_profile(profile, &self.placeholder_name),
                    );
                }
            }
            Err(error) => {
                tracing::warn!(
                    stage = error.stage(),
                    requested = unique.len(),
                    "profile lookup failed, using placeholder names: {error}"
                );
            }
        }

        for id in unique {
            resolved
                .entry(id)
                .or_insert_with(|| UserIdentity::placeholder(id, &self.placeholder_name));
        }
        resolved
    }

    pub async fn resolve<S>(&self, store: &S, id: UserId) -> UserIdentity
    where
        S: ProfileStore + ?Sized,
    {
        self.resolve_many(store, &[id])
            .await
            .remove(&id)
            .unwrap_or_else(|| UserIdentity::placeholder(id, &self.placeholder_name))
    }
}
