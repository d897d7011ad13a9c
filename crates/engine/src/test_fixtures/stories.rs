//! Story builders for tests.

use folio_domain::{
    Bible, CharacterProfile, CharacterRole, ContinuityRecord, CoreConcept, OutlineEntry, UserId,
};

pub fn core() -> CoreConcept {
    CoreConcept {
        title: "The Lantern Keeper".into(),
        theme: "Duty against desire".into(),
        logline: "A harbor keeper must choose between the town and her brother.".into(),
        genre: "Mystery".into(),
        setting_time: "1890s".into(),
        setting_place: "A fishing town".into(),
        setting_world: "Our world".into(),
        style_tone: "Brooding".into(),
        target_chapter_count: None,
        target_chapter_word_count: None,
    }
}

/// A bible whose outline has one entry per title and a one-person cast.
pub fn ready_bible(owner: UserId, titles: &[&str]) -> Bible {
    let outline = titles
        .iter()
        .map(|title| OutlineEntry::new(*title, format!("{title} happens")))
        .collect();
    Bible::new(owner, core())
        .with_characters(vec![CharacterProfile::new("Ines", CharacterRole::Protagonist)])
        .with_outline(outline)
}

pub fn record(location: &str, items: &[&str]) -> ContinuityRecord {
    ContinuityRecord::new(
        format!("The chapter ends at {location}."),
        vec!["A bell rang".into()],
        items.iter().map(|s| s.to_string()).collect(),
        location,
        vec!["Ines".into()],
    )
    .expect("valid record")
}

/// What a well-behaved analysis model replies with.
pub fn analysis_json(location: &str, items: &[&str]) -> String {
    serde_json::json!({
        "summary": format!("The chapter ends at {location}."),
        "keyEvents": ["A bell rang"],
        "items": items,
        "location": location,
        "characters": ["Ines"],
    })
    .to_string()
}
