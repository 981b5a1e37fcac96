use serde::{Deserialize, Serialize};

/// GitHub account profile as maintained by the analysis service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Partial profile update, merged field-by-field into an existing profile
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl UserPatch {
    /// Merge this patch into `profile`, leaving unset fields untouched
    pub fn apply(self, profile: &mut UserProfile) {
        if let Some(username) = self.username {
            profile.username = username;
        }
        if let Some(name) = self.name {
            profile.name = Some(name);
        }
        if let Some(email) = self.email {
            profile.email = Some(email);
        }
        if let Some(avatar_url) = self.avatar_url {
            profile.avatar_url = Some(avatar_url);
        }
        if let Some(github_url) = self.github_url {
            profile.github_url = Some(github_url);
        }
        if let Some(bio) = self.bio {
            profile.bio = Some(bio);
        }
        if let Some(company) = self.company {
            profile.company = Some(company);
        }
        if let Some(location) = self.location {
            profile.location = Some(location);
        }
    }
}

/// Identity and token state for one client process.
///
/// Invariant: `is_authenticated` is true exactly when `user` and `token`
/// are both present. The four identity-bearing fields are only ever
/// written together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub user: Option<UserProfile>,
    pub token: Option<String>,
    pub github_token: Option<String>,
    #[serde(default)]
    pub is_authenticated: bool,
    /// Flips false -> true once a persisted snapshot (or its absence)
    /// has been loaded. Not part of the persisted form.
    #[serde(skip)]
    pub hydrated: bool,
}

impl SessionState {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Recompute `is_authenticated` from field presence
    pub fn enforce_invariant(&mut self) {
        self.is_authenticated = self.user.is_some() && self.token.is_some();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> UserProfile {
        UserProfile {
            id: "42".to_string(),
            username: "octocat".to_string(),
            name: Some("The Octocat".to_string()),
            email: None,
            avatar_url: Some("https://avatars.example/42".to_string()),
            github_url: None,
            bio: Some("original bio".to_string()),
            company: None,
            location: None,
        }
    }

    #[test]
    fn test_patch_merges_only_set_fields() {
        let mut p = profile();
        let patch = UserPatch {
            bio: Some("new bio".to_string()),
            ..Default::default()
        };

        patch.apply(&mut p);

        assert_eq!(p.bio.as_deref(), Some("new bio"));
        assert_eq!(p.username, "octocat");
        assert_eq!(p.name.as_deref(), Some("The Octocat"));
        assert_eq!(p.avatar_url.as_deref(), Some("https://avatars.example/42"));
    }

    #[test]
    fn test_empty_patch_is_identity() {
        let mut p = profile();
        UserPatch::default().apply(&mut p);
        assert_eq!(p, profile());
    }

    #[test]
    fn test_session_state_camel_case_keys() {
        let mut state = SessionState::empty();
        state.user = Some(profile());
        state.token = Some("jwt".to_string());
        state.github_token = Some("gho_abc".to_string());
        state.enforce_invariant();

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["isAuthenticated"], true);
        assert_eq!(json["githubToken"], "gho_abc");
        assert!(json.get("hydrated").is_none());
    }

    #[test]
    fn test_invariant_requires_user_and_token() {
        let mut state = SessionState::empty();
        state.token = Some("jwt".to_string());
        state.enforce_invariant();
        assert!(!state.is_authenticated);

        state.user = Some(profile());
        state.enforce_invariant();
        assert!(state.is_authenticated);
    }
}
