//! Validated runtime configuration.
//!
//! Settings live at `~/.patrol/settings.json`. The schema is fixed and
//! enumerated: unknown keys are rejected at deserialization time, and a
//! batch update is validated as a whole — one violation rejects the entire
//! batch with a [`FieldError`] per offending field, and nothing is merged.
//! A missing or corrupt file loads as [`Settings::default`].

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{io_err, StoreError};
use crate::paths;
use crate::types::RepoSlug;

/// When the daemon runs sync cycles on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Poll timer triggers a cycle every `poll_interval_secs`.
    #[default]
    Auto,
    /// Cycles run only when explicitly requested.
    Manual,
}

/// One rejected field in a settings update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// A repository inclusion pattern: exact slug or regular expression
/// matched against the full `owner/name` form.
#[derive(Debug, Clone)]
pub enum RepoPattern {
    Exact(RepoSlug),
    Pattern(Regex),
}

impl RepoPattern {
    pub fn matches(&self, repo: &RepoSlug) -> bool {
        match self {
            RepoPattern::Exact(slug) => slug == repo,
            RepoPattern::Pattern(re) => re.is_match(&repo.to_string()),
        }
    }
}

/// The full, enumerated settings schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Settings {
    /// Seconds between automatic sync cycles.
    pub poll_interval_secs: u64,
    /// Seconds between garbage-collector runs.
    pub gc_interval_secs: u64,
    /// Maximum simultaneously in-flight repositories per cycle.
    pub concurrency: usize,
    /// Review versions kept per item; older versions are pruned.
    pub retention: usize,
    /// Prior review versions included as generator context (0 disables).
    pub context_versions: usize,
    /// External review generator command; prompt is written to its stdin.
    pub generator_cmd: Vec<String>,
    /// Hard timeout for one generator invocation.
    pub generator_timeout_secs: u64,
    /// Base clones untouched for longer than this are GC candidates.
    pub clone_ttl_days: u64,
    /// Exactly-named repositories to poll directly.
    pub repos: Vec<String>,
    /// Patterns applied to the "involving me" search results.
    pub repo_patterns: Vec<String>,
    /// Process only items authored by `self_login`.
    pub only_own_items: bool,
    /// When false, self-authored items are skipped (ledger still advances).
    pub include_own_items: bool,
    /// The operator's hosting-service login.
    pub self_login: String,
    pub sync_mode: SyncMode,
    /// Extra instructions appended to every generator prompt.
    pub custom_instructions: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            gc_interval_secs: 3600,
            concurrency: 3,
            retention: 5,
            context_versions: 2,
            generator_cmd: vec!["claude".to_string(), "-p".to_string()],
            generator_timeout_secs: 600,
            clone_ttl_days: 30,
            repos: Vec::new(),
            repo_patterns: Vec::new(),
            only_own_items: false,
            include_own_items: true,
            self_login: String::new(),
            sync_mode: SyncMode::Auto,
            custom_instructions: String::new(),
        }
    }
}

/// A partial update: every field optional, unknown keys rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsUpdate {
    pub poll_interval_secs: Option<u64>,
    pub gc_interval_secs: Option<u64>,
    pub concurrency: Option<usize>,
    pub retention: Option<usize>,
    pub context_versions: Option<usize>,
    pub generator_cmd: Option<Vec<String>>,
    pub generator_timeout_secs: Option<u64>,
    pub clone_ttl_days: Option<u64>,
    pub repos: Option<Vec<String>>,
    pub repo_patterns: Option<Vec<String>>,
    pub only_own_items: Option<bool>,
    pub include_own_items: Option<bool>,
    pub self_login: Option<String>,
    pub sync_mode: Option<SyncMode>,
    pub custom_instructions: Option<String>,
}

impl Settings {
    /// Validate the whole structure; returns every violation at once.
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        check_range(
            &mut errors,
            "poll_interval_secs",
            self.poll_interval_secs,
            15,
            86_400,
        );
        check_range(
            &mut errors,
            "gc_interval_secs",
            self.gc_interval_secs,
            60,
            86_400,
        );
        check_range(&mut errors, "concurrency", self.concurrency as u64, 1, 8);
        check_range(&mut errors, "retention", self.retention as u64, 1, 50);
        if self.context_versions > 10 {
            errors.push(FieldError::new(
                "context_versions",
                "must be between 0 and 10",
            ));
        }
        check_range(
            &mut errors,
            "generator_timeout_secs",
            self.generator_timeout_secs,
            30,
            7_200,
        );
        check_range(&mut errors, "clone_ttl_days", self.clone_ttl_days, 1, 365);

        if self.generator_cmd.is_empty() || self.generator_cmd[0].trim().is_empty() {
            errors.push(FieldError::new(
                "generator_cmd",
                "must name an executable (non-empty command)",
            ));
        }

        for (idx, repo) in self.repos.iter().enumerate() {
            if let Err(err) = RepoSlug::parse(repo) {
                errors.push(FieldError::new(&format!("repos[{idx}]"), err.to_string()));
            }
        }
        for (idx, pattern) in self.repo_patterns.iter().enumerate() {
            if compile_pattern(pattern).is_none() {
                errors.push(FieldError::new(
                    &format!("repo_patterns[{idx}]"),
                    "neither an owner/name slug nor a valid regular expression",
                ));
            }
        }

        if self.only_own_items && self.self_login.trim().is_empty() {
            errors.push(FieldError::new(
                "self_login",
                "required when only_own_items is enabled",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Apply `update` on a copy; the copy is validated wholesale and
    /// returned only if every field passes. `self` is never touched.
    pub fn merged(&self, update: SettingsUpdate) -> Result<Settings, StoreError> {
        let mut next = self.clone();
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = update.$field { next.$field = value; })*
            };
        }
        take!(
            poll_interval_secs,
            gc_interval_secs,
            concurrency,
            retention,
            context_versions,
            generator_cmd,
            generator_timeout_secs,
            clone_ttl_days,
            repos,
            repo_patterns,
            only_own_items,
            include_own_items,
            self_login,
            sync_mode,
            custom_instructions,
        );
        next.validate()
            .map_err(|errors| StoreError::InvalidSettings { errors })?;
        Ok(next)
    }

    /// Parsed exact-repo list (entries are pre-validated on save).
    pub fn exact_repos(&self) -> Vec<RepoSlug> {
        self.repos
            .iter()
            .filter_map(|r| RepoSlug::parse(r).ok())
            .collect()
    }

    /// Compiled inclusion patterns for the involving-me search.
    pub fn compiled_patterns(&self) -> Vec<RepoPattern> {
        self.repo_patterns
            .iter()
            .filter_map(|p| compile_pattern(p))
            .collect()
    }
}

/// Exact slugs stay exact; anything else must compile as a regex that is
/// matched against the full `owner/name` string.
fn compile_pattern(pattern: &str) -> Option<RepoPattern> {
    if let Ok(slug) = RepoSlug::parse(pattern) {
        if !pattern.contains(['*', '?', '[', '(', '^', '$', '+', '|']) {
            return Some(RepoPattern::Exact(slug));
        }
    }
    Regex::new(pattern).ok().map(RepoPattern::Pattern)
}

fn check_range(errors: &mut Vec<FieldError>, field: &str, value: u64, min: u64, max: u64) {
    if value < min || value > max {
        errors.push(FieldError::new(
            field,
            format!("must be between {min} and {max}"),
        ));
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Load settings from `<home>/.patrol/settings.json`.
///
/// A missing or unreadable file yields defaults — configuration corruption
/// is never fatal.
pub fn load_at(home: &Path) -> Settings {
    let path = paths::settings_path(home);
    let Ok(contents) = std::fs::read_to_string(&path) else {
        return Settings::default();
    };
    serde_json::from_str(&contents).unwrap_or_default()
}

/// Save settings atomically (`.tmp` sibling + rename).
pub fn save_at(home: &Path, settings: &Settings) -> Result<(), StoreError> {
    let path = paths::settings_path(home);
    let Some(dir) = path.parent() else {
        return Err(io_err(
            &path,
            std::io::Error::other("invalid settings path"),
        ));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(settings)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// Load, merge, validate, and persist an update in one step.
///
/// Returns the new settings; on validation failure nothing is written.
pub fn update_at(home: &Path, update: SettingsUpdate) -> Result<Settings, StoreError> {
    let next = load_at(home).merged(update)?;
    save_at(home, &next)?;
    Ok(next)
}

/// Reset the settings file to defaults.
pub fn reset_at(home: &Path) -> Result<Settings, StoreError> {
    let defaults = Settings::default();
    save_at(home, &defaults)?;
    Ok(defaults)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        Settings::default().validate().expect("defaults must pass");
    }

    #[rstest]
    #[case::poll_too_small("poll_interval_secs", serde_json::json!(5))]
    #[case::concurrency_zero("concurrency", serde_json::json!(0))]
    #[case::concurrency_huge("concurrency", serde_json::json!(64))]
    #[case::retention_zero("retention", serde_json::json!(0))]
    #[case::timeout_too_small("generator_timeout_secs", serde_json::json!(1))]
    fn out_of_range_field_is_rejected(#[case] field: &str, #[case] value: serde_json::Value) {
        let update: SettingsUpdate =
            serde_json::from_value(serde_json::json!({ field: value })).unwrap();
        let err = Settings::default().merged(update).unwrap_err();
        match err {
            StoreError::InvalidSettings { errors } => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].field, field);
            }
            other => panic!("expected InvalidSettings, got {other}"),
        }
    }

    #[test]
    fn unknown_key_is_rejected_at_parse_time() {
        let parsed: Result<SettingsUpdate, _> =
            serde_json::from_value(serde_json::json!({ "poll_cadence": 60 }));
        assert!(parsed.is_err(), "unknown keys must not deserialize");
    }

    #[test]
    fn batch_with_one_bad_field_rejects_all() {
        let update: SettingsUpdate = serde_json::from_value(serde_json::json!({
            "retention": 3,
            "concurrency": 99,
        }))
        .unwrap();
        let base = Settings::default();
        assert!(base.merged(update).is_err());
        // The good field must not have leaked into the base.
        assert_eq!(base.retention, Settings::default().retention);
    }

    #[test]
    fn multiple_violations_reported_together() {
        let update: SettingsUpdate = serde_json::from_value(serde_json::json!({
            "concurrency": 0,
            "retention": 0,
        }))
        .unwrap();
        match Settings::default().merged(update).unwrap_err() {
            StoreError::InvalidSettings { errors } => {
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert!(fields.contains(&"concurrency"));
                assert!(fields.contains(&"retention"));
            }
            other => panic!("expected InvalidSettings, got {other}"),
        }
    }

    #[test]
    fn only_own_requires_self_login() {
        let update: SettingsUpdate =
            serde_json::from_value(serde_json::json!({ "only_own_items": true })).unwrap();
        let err = Settings::default().merged(update).unwrap_err();
        assert!(err.to_string().contains("self_login"));
    }

    #[test]
    fn invalid_repo_slug_names_the_entry() {
        let update: SettingsUpdate =
            serde_json::from_value(serde_json::json!({ "repos": ["acme/widgets", "oops"] }))
                .unwrap();
        match Settings::default().merged(update).unwrap_err() {
            StoreError::InvalidSettings { errors } => {
                assert_eq!(errors[0].field, "repos[1]");
            }
            other => panic!("expected InvalidSettings, got {other}"),
        }
    }

    #[test]
    fn patterns_match_exact_and_regex() {
        let mut settings = Settings::default();
        settings.repo_patterns = vec!["acme/widgets".into(), "acme/gadget-.*".into()];
        let patterns = settings.compiled_patterns();
        assert_eq!(patterns.len(), 2);

        let exact = RepoSlug::parse("acme/widgets").unwrap();
        let regexed = RepoSlug::parse("acme/gadget-tools").unwrap();
        let other = RepoSlug::parse("acme/unrelated").unwrap();
        assert!(patterns.iter().any(|p| p.matches(&exact)));
        assert!(patterns.iter().any(|p| p.matches(&regexed)));
        assert!(!patterns.iter().any(|p| p.matches(&other)));
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let home = TempDir::new().unwrap();
        assert_eq!(load_at(home.path()), Settings::default());
    }

    #[test]
    fn load_corrupt_file_yields_defaults() {
        let home = TempDir::new().unwrap();
        let path = paths::settings_path(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_at(home.path()), Settings::default());
    }

    #[test]
    fn update_persists_and_roundtrips() {
        let home = TempDir::new().unwrap();
        let update: SettingsUpdate = serde_json::from_value(serde_json::json!({
            "retention": 2,
            "repos": ["acme/widgets"],
        }))
        .unwrap();
        let saved = update_at(home.path(), update).unwrap();
        assert_eq!(saved.retention, 2);

        let loaded = load_at(home.path());
        assert_eq!(loaded, saved);

        let tmp = paths::settings_path(home.path()).with_extension("json.tmp");
        assert!(!tmp.exists(), "tmp file should be renamed away");
    }

    #[test]
    fn reset_restores_defaults() {
        let home = TempDir::new().unwrap();
        let update: SettingsUpdate =
            serde_json::from_value(serde_json::json!({ "retention": 2 })).unwrap();
        update_at(home.path(), update).unwrap();
        reset_at(home.path()).unwrap();
        assert_eq!(load_at(home.path()), Settings::default());
    }
}
