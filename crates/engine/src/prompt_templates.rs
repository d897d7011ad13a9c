//! LLM prompt templates used by the engine.
//!
//! Every template has a hard-coded default and can be overridden through an
//! environment variable derived from its key (see [`key_to_env_var`]).
//! Placeholders are written `{name}` and filled by [`render`]; braces that do
//! not name a supplied placeholder are left alone, so JSON examples inside a
//! template survive rendering.

use std::collections::HashMap;

/// All prompt template keys as constants.
pub mod keys {
    /// System prompt for chapter prose.
    pub const CHAPTER_SYSTEM: &str = "chapter.system";
    /// Task prompt for chapter prose.
    pub const CHAPTER_TASK: &str = "chapter.task";
    /// Continuity analysis of a finished chapter.
    pub const CONTINUITY_ANALYSIS: &str = "continuity.analysis";
    /// Whole bible from a one-line idea.
    pub const BIBLE_FULL: &str = "bible.full";
    /// Core concept refinement.
    pub const BIBLE_CORE: &str = "bible.core";
    /// Cast list.
    pub const BIBLE_CHARACTERS: &str = "bible.characters";
    /// Chapter outline.
    pub const BIBLE_OUTLINE: &str = "bible.outline";
    /// Style guide.
    pub const BIBLE_INSTRUCTIONS: &str = "bible.instructions";
}

/// Default values for all prompt templates.
pub mod defaults {
    pub const CHAPTER_SYSTEM: &str = "You are a world-class novelist specialized in long-form serialized fiction. \
You write vivid, tightly paced prose and never lose track of where the story left off.";

    pub const CHAPTER_TASK: &str = r#"STORY BIBLE:
{bible_json}

{context}

CURRENT TASK:
Write the content for chapter: "{title}".
Plot summary for this chapter: {summary}

STRICT GUIDELINES:
1. Language: {language}.
2. Word count target: {word_target} words (count characters for CJK text).
3. Style: follow the "instructions" section of the bible strictly.
4. CONTINUITY IS CRITICAL:
   - If this is not the first chapter, start exactly where the previous chapter ended ({start_location}).
   - Stay consistent with previously acquired items and character knowledge.
5. Tight pacing: every paragraph must advance the plot or deepen the conflict.
6. Avoid stage directions such as nodding, sighing or walking to the door; focus on subtext and dialogue.
7. End the chapter with tension or a revelation.

Output ONLY the story content in Markdown. Do not wrap it in code blocks and do not repeat the chapter title."#;

    pub const CONTINUITY_ANALYSIS: &str = r#"Role: continuity editor for a novel.
Task: analyze the chapter below and extract what the next chapter must stay consistent with.

Chapter title: {title}
Content:
{content}

Strict guidelines:
1. Output MUST be a single valid JSON object and nothing else.
2. All string values MUST be in {language}; keep the JSON keys in English.

Return a JSON object with exactly these keys:
- summary: (string) a concise 50-100 word summary of what happened.
- keyEvents: (string[]) the 3-5 major plot points or revelations, in order.
- items: (string[]) key items acquired, lost, or significantly used.
- location: (string) EXACTLY where the chapter ends. Be specific about the immediate surroundings, e.g. "standing before the oak door in the cellar". Never answer with a vague word such as "outside" or "unknown".
- characters: (string[]) characters active or present in this chapter."#;

    pub const BIBLE_FULL: &str = r#"Role: best-selling novel architect.
Task: build a complete story bible from the author's idea in one pass.

Author idea: "{idea}"
Target chapter count: {chapter_count}
Target words per chapter: {word_count}

Strict guidelines:
1. Output MUST be a single valid JSON object matching the structure below.
2. All string values MUST be in {language}.
3. The core title MUST NOT contain book title marks such as 《》.
4. Build a high-stakes, fast-paced plot; every outline entry has a clear conflict and ends on a hook.
5. Define characters by internal conflict and active choices.
6. Produce exactly {chapter_count} outline entries, in story order.

JSON structure:
{
  "core": { "title": "", "theme": "", "logline": "", "genre": "", "settingTime": "", "settingPlace": "", "settingWorld": "", "styleTone": "" },
  "characters": [ { "name": "", "role": "Protagonist | Antagonist | Supporting", "description": "", "background": "", "motivation": "", "arcOrConflict": "" } ],
  "outline": [ { "title": "", "summary": "" } ],
  "instructions": { "pov": "", "pacing": "", "dialogueStyle": "", "sensoryDetails": "", "keyElements": "", "avoid": "" }
}"#;

    pub const BIBLE_CORE: &str = r#"Role: world-class novelist and creative director.
Task: create or refine the core concept of a novel. Fill in missing fields and polish the existing ones.

Current core concept:
{current_json}

Strict guidelines:
1. Output MUST be a single valid JSON object.
2. All string values MUST be in {language}.
3. The title MUST NOT contain book title marks such as 《》.

Return a JSON object with these keys: title, theme, logline (one sentence with a strong conflict), genre, settingTime, settingPlace, settingWorld, styleTone."#;

    pub const BIBLE_CHARACTERS: &str = r#"Role: character designer.
Core concept:
{core_json}

Existing characters (polish them if present, otherwise create a protagonist, an antagonist and one or two supporting characters):
{characters_json}

Strict guidelines:
1. Output MUST be a JSON array only.
2. All string values MUST be in {language}.
3. role MUST be one of "Protagonist", "Antagonist", "Supporting".

Each element has the keys: name, role, description, background, motivation, arcOrConflict."#;

    pub const BIBLE_OUTLINE: &str = r#"Create a structured chapter outline for a novel.
Core concept:
{core_json}
Characters:
{characters_json}

Task: produce about {chapter_count} chapters forming a complete arc with rising action, a climax and real turning points.

Strict guidelines:
1. Output MUST be a JSON array only, in story order.
2. All string values MUST be in {language}.

Each element has the shape { "title": string, "summary": string focused on the chapter's conflict and outcome }."#;

    pub const BIBLE_INSTRUCTIONS: &str = r#"Role: literary editor.
Core concept:
{core_json}
Cast: {cast}

Task: define the writing style guide.

Strict guidelines:
1. Output MUST be a single valid JSON object.
2. All string values MUST be in {language}.

Return a JSON object with these keys: pov, pacing (fast and tight), dialogueStyle, sensoryDetails, keyElements, avoid (explicitly mention excessive physical stage directions)."#;
}

/// Convert a template key to its environment variable name.
///
/// `chapter.task` becomes `FOLIO_PROMPT_CHAPTER_TASK`.
pub fn key_to_env_var(key: &str) -> String {
    format!("FOLIO_PROMPT_{}", key.to_uppercase().replace('.', "_"))
}

/// Get the default value for a template key.
pub fn get_default(key: &str) -> Option<&'static str> {
    match key {
        keys::CHAPTER_SYSTEM => Some(defaults::CHAPTER_SYSTEM),
        keys::CHAPTER_TASK => Some(defaults::CHAPTER_TASK),
        keys::CONTINUITY_ANALYSIS => Some(defaults::CONTINUITY_ANALYSIS),
        keys::BIBLE_FULL => Some(defaults::BIBLE_FULL),
        keys::BIBLE_CORE => Some(defaults::BIBLE_CORE),
        keys::BIBLE_CHARACTERS => Some(defaults::BIBLE_CHARACTERS),
        keys::BIBLE_OUTLINE => Some(defaults::BIBLE_OUTLINE),
        keys::BIBLE_INSTRUCTIONS => Some(defaults::BIBLE_INSTRUCTIONS),
        _ => None,
    }
}

pub fn all_keys() -> Vec<&'static str> {
    vec![
        keys::CHAPTER_SYSTEM,
        keys::CHAPTER_TASK,
        keys::CONTINUITY_ANALYSIS,
        keys::BIBLE_FULL,
        keys::BIBLE_CORE,
        keys::BIBLE_CHARACTERS,
        keys::BIBLE_OUTLINE,
        keys::BIBLE_INSTRUCTIONS,
    ]
}

/// Fill `{name}` placeholders in a single pass.
///
/// Substituted values are never re-scanned, so prose or JSON containing
/// braces cannot inject further substitutions.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after
            .find('}')
            .and_then(|close| {
                let name = &after[..close];
                vars.iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| (*value, close))
            });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Resolved templates: environment overrides on top of the defaults.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    resolved: HashMap<&'static str, String>,
}

impl PromptTemplates {
    /// Defaults only.
    pub fn defaults() -> Self {
        let resolved = all_keys()
            .into_iter()
            .filter_map(|key| get_default(key).map(|value| (key, value.to_string())))
            .collect();
        Self { resolved }
    }

    pub fn from_env() -> Self {
        let mut templates = Self::defaults();
        for key in all_keys() {
            let env_var = key_to_env_var(key);
            if let Ok(value) = std::env::var(&env_var) {
                if !value.trim().is_empty() {
                    tracing::info!(key, env_var = %env_var, "Prompt template overridden from environment");
                    templates.resolved.insert(key, value);
                }
            }
        }
        templates
    }

    pub fn get(&self, key: &str) -> &str {
        self.resolved
            .get(key)
            .map(String::as_str)
            .or_else(|| get_default(key))
            .unwrap_or_default()
    }

    pub fn render(&self, key: &str, vars: &[(&str, &str)]) -> String {
        render(self.get(key), vars)
    }

    #[cfg(test)]
    pub fn with_override(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.resolved.insert(key, value.into());
        self
    }
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_key_has_a_default() {
        for key in all_keys() {
            assert!(get_default(key).is_some(), "missing default for {key}");
        }
    }

    #[test]
    fn env_var_names_follow_key() {
        assert_eq!(
            key_to_env_var(keys::CONTINUITY_ANALYSIS),
            "FOLIO_PROMPT_CONTINUITY_ANALYSIS"
        );
    }

    #[test]
    fn render_fills_known_placeholders_only() {
        let out = render("{ \"a\": 1 } {title} {missing}", &[("title", "Dusk")]);
        assert_eq!(out, "{ \"a\": 1 } Dusk {missing}");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let out = render("{content} / {title}", &[("content", "{title}"), ("title", "T")]);
        assert_eq!(out, "{title} / T");
    }

    #[test]
    fn unterminated_brace_is_kept() {
        assert_eq!(render("tail {", &[("x", "y")]), "tail {");
    }

    #[test]
    fn analysis_template_names_all_record_fields() {
        let templates = PromptTemplates::defaults();
        let prompt = templates.get(keys::CONTINUITY_ANALYSIS);
        for field in ["summary", "keyEvents", "items", "location", "characters"] {
            assert!(prompt.contains(field), "analysis prompt lacks {field}");
        }
    }

    #[test]
    fn override_replaces_default() {
        let templates = PromptTemplates::defaults().with_override(keys::CHAPTER_SYSTEM, "terse");
        assert_eq!(templates.get(keys::CHAPTER_SYSTEM), "terse");
    }
}
