use log::{debug, info, warn};
use std::path::Path;
use tokio::fs;

use crate::bot::pattern_matching::{build_rule, has_wildcard};
use crate::error::{AutoModError, AutoModResult};
use crate::types::{Rule, RuleKind};

/// Separator between the fields of a rule line
pub const FIELD_SEPARATOR: &str = "::";

/// Ordered collection of rules, unique by pattern text.
/// Evaluation walks the rules in insertion order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a rule; an existing rule with the same pattern is replaced in place.
    /// Returns true when a rule was replaced.
    pub fn insert(&mut self, rule: Rule) -> bool {
        match self.rules.iter_mut().find(|r| r.pattern == rule.pattern) {
            Some(existing) => {
                *existing = rule;
                true
            }
            None => {
                self.rules.push(rule);
                false
            }
        }
    }

    pub fn remove(&mut self, pattern: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.pattern != pattern);
        self.rules.len() != before
    }

    pub fn get(&self, pattern: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.pattern == pattern)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn as_slice(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FromIterator<Rule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = Rule>>(iter: I) -> Self {
        let mut set = RuleSet::new();
        for rule in iter {
            set.insert(rule);
        }
        set
    }
}

/// Nickname and message rule collections
#[derive(Debug, Clone, Default)]
pub struct RuleStore {
    nick_rules: RuleSet,
    word_rules: RuleSet,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collection(&self, kind: RuleKind) -> &RuleSet {
        match kind {
            RuleKind::Nick => &self.nick_rules,
            RuleKind::Word => &self.word_rules,
        }
    }

    fn collection_mut(&mut self, kind: RuleKind) -> &mut RuleSet {
        match kind {
            RuleKind::Nick => &mut self.nick_rules,
            RuleKind::Word => &mut self.word_rules,
        }
    }

    /// Add a rule through the explicit add path: a `*` in the pattern makes it
    /// a wildcard rule. On an invalid pattern the store is left unchanged.
    pub fn add(
        &mut self,
        kind: RuleKind,
        pattern: &str,
        message: &str,
        duration_minutes: Option<u32>,
    ) -> AutoModResult<()> {
        let rule = build_rule(pattern, message, duration_minutes, has_wildcard(pattern))?;
        let wildcard = rule.is_wildcard;
        if self.collection_mut(kind).insert(rule) {
            info!("Replaced {} rule '{}'", kind, pattern);
        } else {
            info!("Added {} rule '{}' (wildcard: {})", kind, pattern, wildcard);
        }
        Ok(())
    }

    pub fn remove(&mut self, kind: RuleKind, pattern: &str) -> bool {
        let removed = self.collection_mut(kind).remove(pattern);
        if removed {
            info!("Removed {} rule '{}'", kind, pattern);
        }
        removed
    }

    pub fn list(&self, kind: RuleKind) -> &[Rule] {
        self.collection(kind).as_slice()
    }

    /// Replace a collection wholesale
    pub fn replace(&mut self, kind: RuleKind, rules: RuleSet) {
        *self.collection_mut(kind) = rules;
    }

    /// Load a collection from its rule file. A missing file yields an empty
    /// collection; on a read error the in-memory collection is kept.
    pub async fn load_from(&mut self, kind: RuleKind, path: &Path) -> AutoModResult<usize> {
        let rules = read_rule_file(path).await?;
        let count = rules.len();
        self.replace(kind, rules);
        debug!("Loaded {} {} rules from {}", count, kind, path.display());
        Ok(count)
    }

    pub async fn save_to(&self, kind: RuleKind, path: &Path) -> AutoModResult<()> {
        write_rule_file(path, kind, self.list(kind)).await
    }
}

/// Split a `pattern :: message :: minutes` line into its fields.
/// Returns `None` when the pattern is empty.
pub fn parse_rule_line(line: &str) -> Option<(String, String, Option<u32>)> {
    let mut parts = line.split(FIELD_SEPARATOR).map(str::trim);

    let pattern = parts.next().filter(|p| !p.is_empty())?.to_string();
    let message = parts.next().unwrap_or("").to_string();
    let duration = parts
        .next()
        .and_then(|m| m.parse::<u32>().ok())
        .filter(|m| *m > 0);

    Some((pattern, message, duration))
}

/// Parse rule file contents. Persisted rules are never given wildcard
/// semantics, whatever their text looks like.
pub fn parse_rules(content: &str) -> RuleSet {
    let mut rules = RuleSet::new();

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((pattern, message, duration)) = parse_rule_line(line) else {
            warn!("Skipping rule line without a pattern: {}", line);
            continue;
        };

        match build_rule(&pattern, &message, duration, false) {
            Ok(rule) => {
                rules.insert(rule);
            }
            Err(e) => warn!("Invalid pattern skipped: {}", e),
        }
    }

    rules
}

pub fn file_header(kind: RuleKind) -> String {
    let file = match kind {
        RuleKind::Nick => "bad_nicks.txt",
        RuleKind::Word => "bad_words.txt",
    };
    format!(
        "# {} - pattern :: message :: minutes(optional)\n\
         # Use *wildcards* for new rules, e.g. *badword* :: msg :: 60\n",
        file
    )
}

pub fn render_rules(kind: RuleKind, rules: &[Rule]) -> String {
    let mut out = file_header(kind);
    for rule in rules {
        out.push_str(&rule.to_line());
        out.push('\n');
    }
    out
}

pub async fn read_rule_file(path: &Path) -> AutoModResult<RuleSet> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(parse_rules(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RuleSet::new()),
        Err(e) => Err(AutoModError::persistence(path, e)),
    }
}

pub async fn write_rule_file(path: &Path, kind: RuleKind, rules: &[Rule]) -> AutoModResult<()> {
    fs::write(path, render_rules(kind, rules))
        .await
        .map_err(|e| AutoModError::persistence(path, e))?;
    info!("Saved {} {} rules to {}", rules.len(), kind, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_rule_line_fields() {
        assert_eq!(
            parse_rule_line("*spam* :: no spam :: 30"),
            Some(("*spam*".to_string(), "no spam".to_string(), Some(30)))
        );
        assert_eq!(
            parse_rule_line("badnick::go away"),
            Some(("badnick".to_string(), "go away".to_string(), None))
        );
        assert_eq!(
            parse_rule_line("word :: msg :: soon"),
            Some(("word".to_string(), "msg".to_string(), None))
        );
        assert_eq!(parse_rule_line(" :: orphan message"), None);
    }

    #[test]
    fn test_add_overwrites_in_place() {
        let mut store = RuleStore::new();
        store.add(RuleKind::Word, "first", "one", None).unwrap();
        store.add(RuleKind::Word, "second", "two", None).unwrap();
        store.add(RuleKind::Word, "first", "updated", Some(5)).unwrap();

        let rules = store.list(RuleKind::Word);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].pattern, "first");
        assert_eq!(rules[0].message, "updated");
        assert_eq!(rules[0].duration_minutes, Some(5));
        assert!(store.list(RuleKind::Nick).is_empty());
    }

    #[test]
    fn test_add_infers_wildcard_from_marker() {
        let mut store = RuleStore::new();
        store.add(RuleKind::Nick, "*rambo*", "", None).unwrap();
        store.add(RuleKind::Nick, "troll", "", None).unwrap();

        let rules = store.list(RuleKind::Nick);
        assert!(rules[0].is_wildcard);
        assert!(!rules[1].is_wildcard);
    }

    #[test]
    fn test_add_rejects_oversized_pattern_without_changes() {
        let mut store = RuleStore::new();
        store.add(RuleKind::Word, "spam", "no spam", Some(30)).unwrap();

        let pattern = "a".repeat(3_000_000) + "*";
        let result = store.add(RuleKind::Word, &pattern, "huge", None);
        assert!(matches!(result, Err(AutoModError::InvalidPattern { .. })));

        let rules = store.list(RuleKind::Word);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].pattern, "spam");
        assert_eq!(rules[0].message, "no spam");
    }

    #[test]
    fn test_remove_reports_presence() {
        let mut store = RuleStore::new();
        store.add(RuleKind::Nick, "troll", "", None).unwrap();
        assert!(store.remove(RuleKind::Nick, "troll"));
        assert!(!store.remove(RuleKind::Nick, "troll"));
    }

    #[test]
    fn test_parse_rules_skips_comments_and_never_promotes_wildcards() {
        let content = "# header\n\n*rambo* :: no rambos :: 15\nspam.* :: spam\n";
        let rules = parse_rules(content);
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| !r.is_wildcard));
        assert_eq!(rules.get("*rambo*").unwrap().duration_minutes, Some(15));
    }

    #[tokio::test]
    async fn test_save_and_reload_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad_words.txt");

        let mut store = RuleStore::new();
        store.add(RuleKind::Word, "spam", "no spam", Some(10)).unwrap();
        store.add(RuleKind::Word, "*scam*", "no scams", None).unwrap();
        store.add(RuleKind::Word, "^buy now$", "ads", Some(120)).unwrap();
        store.save_to(RuleKind::Word, &path).await.unwrap();

        let mut reloaded = RuleStore::new();
        let count = reloaded.load_from(RuleKind::Word, &path).await.unwrap();
        assert_eq!(count, 3);

        for (original, loaded) in store
            .list(RuleKind::Word)
            .iter()
            .zip(reloaded.list(RuleKind::Word))
        {
            assert_eq!(original.pattern, loaded.pattern);
            assert_eq!(original.message, loaded.message);
            assert_eq!(original.duration_minutes, loaded.duration_minutes);
            // wildcard status is not re-inferred from the file text
            assert!(!loaded.is_wildcard);
        }
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let mut store = RuleStore::new();
        let count = store
            .load_from(RuleKind::Nick, &dir.path().join("absent.txt"))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
