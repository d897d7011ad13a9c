//! Continuity context assembly.

use std::fmt::Write;

use folio_domain::{Chapter, Manuscript};

/// Briefing used when nothing precedes the requested chapter.
pub const OPENING_INSTRUCTION: &str = "This is the FIRST chapter. Establish the world and characters effectively. Start the plot immediately.";

const SYNOPSIS_HEADER: &str = "## PREVIOUS STORY SYNOPSIS (The story so far):";
const WORLD_STATE_HEADER: &str = "## CURRENT WORLD STATE (MUST FOLLOW FOR CONTINUITY):";
const REWRITE_HEADER: &str = "## REWRITE INSTRUCTIONS (USER FEEDBACK):";

/// Characters of raw prose quoted for a chapter that has no continuity record.
pub const EXCERPT_CHARS: usize = 300;

/// Builds the natural-language briefing for one outline position.
///
/// Output depends only on the chapters before the position and the rewrite
/// instructions; the same inputs always yield the same text.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    excerpt_chars: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self {
            excerpt_chars: EXCERPT_CHARS,
        }
    }
}

impl ContextAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assemble(
        &self,
        manuscript: &Manuscript,
        position: usize,
        rewrite_instructions: Option<&str>,
    ) -> String {
        let prior = manuscript.prior_chapters(position);

        let mut out = if prior.is_empty() {
            OPENING_INSTRUCTION.to_string()
        } else {
            let mut out = String::new();
            self.write_synopsis(&mut out, &prior);
            if let Some((_, last)) = prior.last() {
                write_world_state(&mut out, last);
            }
            out
        };

        if let Some(instructions) = rewrite_instructions.map(str::trim).filter(|s| !s.is_empty()) {
            write_rewrite_block(&mut out, instructions);
        }

        out
    }

    fn write_synopsis(&self, out: &mut String, prior: &[(usize, &Chapter)]) {
        out.push_str(SYNOPSIS_HEADER);
        out.push('\n');

        for (position, chapter) in prior {
            let _ = writeln!(out, "\n[Chapter {}: {}]", position + 1, chapter.title);
            match &chapter.continuity {
                Some(record) => {
                    let _ = writeln!(out, "Summary: {}", record.summary);
                    let _ = writeln!(out, "Key Events: {}", record.key_events.join(", "));
                    let _ = writeln!(out, "Items Involved: {}", record.items.join(", "));
                    let _ = writeln!(out, "Ending Location: {}", record.location);
                }
                None => {
                    let excerpt: String = chapter.content.chars().take(self.excerpt_chars).collect();
                    let _ = writeln!(out, "Content Excerpt: {}...", excerpt);
                }
            }
        }
    }
}

fn write_world_state(out: &mut String, last: &Chapter) {
    let Some(record) = &last.continuity else {
        return;
    };
    let _ = writeln!(out, "\n{}", WORLD_STATE_HEADER);
    let _ = writeln!(out, "- STARTING LOCATION: {}", record.location);
    out.push_str("  The scene MUST start at this exact place.\n");
    let _ = writeln!(out, "- INVENTORY/STATUS: {}", record.inventory_line());
    out.push_str("- IMMEDIATE CONTEXT: Continue directly from the events of the previous chapter.\n");
}

fn write_rewrite_block(out: &mut String, instructions: &str) {
    let _ = write!(
        out,
        "\n\n{REWRITE_HEADER}\n\
         The user has explicitly requested a rewrite with the following instructions:\n\
         <<<\n{instructions}\n>>>\n\
         These instructions take priority over the default approach, while story continuity \
         and high literary quality must be preserved.\n"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use folio_domain::{ContinuityRecord, OutlineEntry};

    fn record(location: &str, items: &[&str]) -> ContinuityRecord {
        ContinuityRecord::new(
            format!("Events ending at {location}"),
            vec!["The bell rang".into()],
            items.iter().map(|s| s.to_string()).collect(),
            location,
            vec!["Ines".into()],
        )
        .unwrap()
    }

    fn outline(n: usize) -> Vec<OutlineEntry> {
        (0..n)
            .map(|i| OutlineEntry::new(format!("Part {}", i + 1), "summary"))
            .collect()
    }

    fn done(entry: &OutlineEntry, record: ContinuityRecord) -> Chapter {
        Chapter::new(entry.id, entry.title.clone(), Utc::now())
            .with_content("prose")
            .with_continuity(record)
    }

    #[test]
    fn first_position_gets_opening_instruction() {
        let manuscript = Manuscript::new(outline(3), vec![]);

        let context = ContextAssembler::new().assemble(&manuscript, 0, None);

        assert_eq!(context, OPENING_INSTRUCTION);
    }

    #[test]
    fn world_state_comes_from_most_recent_record() {
        let entries = outline(3);
        let chapters = vec![
            done(&entries[0], record("Old mill", &["rope"])),
            done(&entries[1], record("dock at midnight", &["lantern"])),
        ];
        let manuscript = Manuscript::new(entries, chapters);

        let context = ContextAssembler::new().assemble(&manuscript, 2, None);

        assert!(context.starts_with(SYNOPSIS_HEADER));
        assert!(context.contains("[Chapter 1: Part 1]"));
        assert!(context.contains("[Chapter 2: Part 2]"));
        assert!(context.contains("Ending Location: Old mill"));
        assert!(context.contains("STARTING LOCATION: dock at midnight"));
        assert!(context.contains("INVENTORY/STATUS: lantern\n"));
        assert!(!context.contains("STARTING LOCATION: Old mill"));
    }

    #[test]
    fn empty_inventory_reads_none() {
        let entries = outline(2);
        let chapters = vec![done(&entries[0], record("Cellar stairs", &[]))];
        let manuscript = Manuscript::new(entries, chapters);

        let context = ContextAssembler::new().assemble(&manuscript, 1, None);

        assert!(context.contains("INVENTORY/STATUS: None"));
    }

    #[test]
    fn never_mentions_chapters_at_or_after_position() {
        let entries = outline(3);
        let chapters = vec![
            done(&entries[0], record("Gate", &[])),
            done(&entries[1], record("Tower roof", &["key"])),
            done(&entries[2], record("Sea cliff", &["map"])),
        ];
        let manuscript = Manuscript::new(entries, chapters);

        let context = ContextAssembler::new().assemble(&manuscript, 1, None);

        assert!(context.contains("Part 1"));
        assert!(!context.contains("Part 2"));
        assert!(!context.contains("Tower roof"));
        assert!(!context.contains("Sea cliff"));
    }

    #[test]
    fn recordless_chapter_falls_back_to_excerpt_without_world_state() {
        let entries = outline(2);
        let legacy_prose: String = "龍".repeat(400);
        let chapters = vec![Chapter::new(entries[0].id, "Part 1", Utc::now()).with_content(&legacy_prose)];
        let manuscript = Manuscript::new(entries, chapters);

        let context = ContextAssembler::new().assemble(&manuscript, 1, None);

        let expected = format!("Content Excerpt: {}...", "龍".repeat(EXCERPT_CHARS));
        assert!(context.contains(&expected));
        assert!(!context.contains(WORLD_STATE_HEADER));
    }

    #[test]
    fn rewrite_instructions_are_appended_in_their_own_block() {
        let manuscript = Manuscript::new(outline(1), vec![]);

        let context = ContextAssembler::new().assemble(&manuscript, 0, Some("  More rain.  "));

        assert!(context.starts_with(OPENING_INSTRUCTION));
        assert!(context.contains(REWRITE_HEADER));
        assert!(context.contains("<<<\nMore rain.\n>>>"));
    }

    #[test]
    fn blank_rewrite_instructions_are_ignored() {
        let manuscript = Manuscript::new(outline(1), vec![]);

        let context = ContextAssembler::new().assemble(&manuscript, 0, Some("   "));

        assert_eq!(context, OPENING_INSTRUCTION);
    }

    #[test]
    fn assembly_is_deterministic() {
        let entries = outline(3);
        let chapters = vec![
            done(&entries[0], record("Gate", &["coin"])),
            done(&entries[1], record("Bridge", &["coin", "lamp"])),
        ];
        let manuscript = Manuscript::new(entries, chapters);
        let assembler = ContextAssembler::new();

        let a = assembler.assemble(&manuscript, 2, Some("Faster"));
        let b = assembler.assemble(&manuscript, 2, Some("Faster"));

        assert_eq!(a, b);
    }
}
