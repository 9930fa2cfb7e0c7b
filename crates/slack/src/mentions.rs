//! Rewrites `<@U123>` / `<@U123|label>` user mentions as `@name`.

use std::{collections::HashMap, sync::LazyLock};

use regex::{Captures, Regex};

use crate::identity::IdentityResolver;

static USER_MENTION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"<@([UW][A-Z0-9]+)(?:\|[^>]*)?>").ok());

/// User ids mentioned in `text`, first occurrence order, without repeats.
pub fn mentioned_users(text: &str) -> Vec<String> {
    let Some(re) = USER_MENTION.as_ref() else {
        return Vec::new();
    };
    let mut ids: Vec<String> = Vec::new();
    for caps in re.captures_iter(text) {
        let id = &caps[1];
        if !ids.iter().any(|seen| seen == id) {
            ids.push(id.to_owned());
        }
    }
    ids
}

/// Replace each mention using `labels` (user id → name). Mentions without a
/// label are left untouched.
pub fn replace_mentions(text: &str, labels: &HashMap<String, String>) -> String {
    let Some(re) = USER_MENTION.as_ref() else {
        return text.to_owned();
    };
    re.replace_all(text, |caps: &Captures<'_>| match labels.get(&caps[1]) {
        Some(label) => format!("@{label}"),
        None => caps[0].to_owned(),
    })
    .into_owned()
}

/// Resolve every mentioned user through `identity` and rewrite the text.
pub async fn resolve_mentions(text: &str, identity: &IdentityResolver) -> String {
    let ids = mentioned_users(text);
    if ids.is_empty() {
        return text.to_owned();
    }
    let mut labels = HashMap::with_capacity(ids.len());
    for id in ids {
        let profile = identity.resolve_user(&id).await;
        labels.insert(id, profile.mention_label().to_owned());
    }
    replace_mentions(text, &labels)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use {secrecy::Secret, waigaya_common::Profile};

    use super::*;
    use crate::{identity::IdentitySettings, testing::FakeApi};

    #[test]
    fn collects_unique_ids() {
        let ids = mentioned_users("<@U1> and <@U2|bob> and <@U1> but not <#C1|general>");
        assert_eq!(ids, ["U1", "U2"]);
    }

    #[test]
    fn replaces_both_forms_and_keeps_unknown() {
        let labels = HashMap::from([("U1".to_owned(), "ali".to_owned())]);
        assert_eq!(
            replace_mentions("hi <@U1>, <@U1|alice> and <@U9>", &labels),
            "hi @ali, @ali and <@U9>"
        );
    }

    #[tokio::test]
    async fn resolves_through_identity_cache() {
        let api = Arc::new(FakeApi::default());
        api.add_user(Profile {
            display_name: Some("ali".into()),
            ..FakeApi::profile("U1", "alice")
        });
        let identity = IdentityResolver::new(api.clone(), IdentitySettings::default());
        identity.set_bot_token(&Secret::new("xoxb-1".into()));

        let text = resolve_mentions("ping <@U1> <@U1> <@U404>", &identity).await;
        assert_eq!(text, "ping @ali @ali @unknown");
        assert_eq!(api.calls("users.info"), 2);
    }
}
