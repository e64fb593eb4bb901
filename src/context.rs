//! # Per-User Context Assembly
//!
//! Builds the static instruction material a live session is seeded with: the
//! assistant persona plus whatever the storage collaborator knows about the
//! teacher (profile, today's timetable, recent reflections).
//!
//! The bundle is computed once at session start and never refreshed; a
//! mid-session profile edit shows up in the next conversation. Every part is
//! optional, so a brand-new user simply gets the persona alone.

use serde::{Deserialize, Serialize};

/// Assistant persona, prepended to every session's instruction.
const PERSONA: &str = "You are TeacherOS AI — a calm, wise, and supportive teaching assistant for Indian school teachers. You speak naturally and concisely. Keep responses under 3 sentences unless asked for more detail.

Your role:
- Help with classroom management, lesson planning, and teaching strategies
- Give practical, actionable advice suited to Indian classrooms (CBSE, ICSE, State Boards)
- Be empathetic — teachers are often stressed and overworked
- Use simple language, avoid jargon unless the teacher uses it first
";

/// Teacher profile as the storage collaborator reports it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherProfile {
    pub name: String,
    pub school_type: String,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
}

/// One timetable slot for today.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimetableEntry {
    pub time: String,
    pub class_name: String,
    #[serde(default)]
    pub section: Option<String>,
    pub subject: String,
    #[serde(default)]
    pub topic: Option<String>,
}

/// One end-of-class reflection. Energy is coded 0 (low) / 1 (okay) / 2 (high).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reflection {
    pub energy: i32,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Read-only snapshot handed to the backend as system instruction material.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextBundle {
    #[serde(default)]
    pub profile: Option<TeacherProfile>,
    #[serde(default)]
    pub timetable: Vec<TimetableEntry>,
    #[serde(default)]
    pub reflections: Vec<Reflection>,
}

impl ContextBundle {
    pub fn is_empty(&self) -> bool {
        self.profile.is_none() && self.timetable.is_empty() && self.reflections.is_empty()
    }

    /// Render the bundle as the session's system instruction.
    ///
    /// ## Layout:
    /// Persona, then a "Teacher Context" block if a profile exists, then
    /// "Today's Schedule" if the timetable is non-empty, then the LAST
    /// `reflection_limit` reflections. Empty list fields degrade to
    /// "Not specified" rather than disappearing, so the model knows the
    /// teacher skipped them.
    pub fn system_instruction(&self, reflection_limit: usize) -> String {
        let mut context = String::from(PERSONA);

        if let Some(profile) = &self.profile {
            context.push_str(&format!(
                "\n## Teacher Context\n- Name: {}\n- School Board: {}\n- Subjects: {}\n- Classes: {}\n- Available Resources: {}\n",
                profile.name,
                profile.school_type,
                join_or_unspecified(&profile.subjects),
                join_or_unspecified(&profile.classes),
                join_or_unspecified(&profile.resources),
            ));
        }

        if !self.timetable.is_empty() {
            context.push_str("\n## Today's Schedule\n");
            for entry in &self.timetable {
                let section = match &entry.section {
                    Some(section) if !section.is_empty() => format!("-{}", section),
                    _ => String::new(),
                };
                let topic = match &entry.topic {
                    Some(topic) if !topic.is_empty() => format!(" — Topic: {}", topic),
                    _ => String::new(),
                };
                context.push_str(&format!(
                    "- {}: {} (Class {}{}){}\n",
                    entry.time, entry.subject, entry.class_name, section, topic
                ));
            }
        }

        if !self.reflections.is_empty() {
            let skip = self.reflections.len().saturating_sub(reflection_limit);
            context.push_str("\n## Recent Reflections\n");
            for reflection in &self.reflections[skip..] {
                let energy = match reflection.energy {
                    0 => "Low",
                    1 => "Okay",
                    _ => "High",
                };
                let strategy = match &reflection.strategy {
                    Some(strategy) if !strategy.is_empty() => {
                        format!(", Strategy: {}", strategy)
                    }
                    _ => String::new(),
                };
                let notes = match &reflection.notes {
                    Some(notes) if !notes.is_empty() => format!(", Notes: {}", notes),
                    _ => String::new(),
                };
                context.push_str(&format!("- Energy: {}{}{}\n", energy, strategy, notes));
            }
        }

        context
    }
}

fn join_or_unspecified(items: &[String]) -> String {
    if items.is_empty() {
        "Not specified".to_string()
    } else {
        items.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_bundle() -> ContextBundle {
        ContextBundle {
            profile: Some(TeacherProfile {
                name: "Asha".to_string(),
                school_type: "CBSE".to_string(),
                subjects: vec!["Math".to_string(), "Science".to_string()],
                classes: vec!["6".to_string(), "7".to_string()],
                resources: vec![],
            }),
            timetable: vec![
                TimetableEntry {
                    time: "09:00".to_string(),
                    class_name: "6".to_string(),
                    section: Some("B".to_string()),
                    subject: "Math".to_string(),
                    topic: Some("Fractions".to_string()),
                },
                TimetableEntry {
                    time: "11:00".to_string(),
                    class_name: "7".to_string(),
                    section: None,
                    subject: "Science".to_string(),
                    topic: None,
                },
            ],
            reflections: vec![
                Reflection {
                    energy: 0,
                    strategy: Some("group work".to_string()),
                    notes: None,
                },
                Reflection {
                    energy: 2,
                    strategy: None,
                    notes: Some("went great".to_string()),
                },
            ],
        }
    }

    #[test]
    fn test_empty_bundle_yields_persona_only() {
        let bundle = ContextBundle::default();
        assert!(bundle.is_empty());

        let instruction = bundle.system_instruction(5);
        assert!(instruction.starts_with("You are TeacherOS AI"));
        assert!(!instruction.contains("## Teacher Context"));
        assert!(!instruction.contains("## Today's Schedule"));
        assert!(!instruction.contains("## Recent Reflections"));
    }

    #[test]
    fn test_profile_block_rendering() {
        let instruction = full_bundle().system_instruction(5);
        assert!(instruction.contains("- Name: Asha"));
        assert!(instruction.contains("- School Board: CBSE"));
        assert!(instruction.contains("- Subjects: Math, Science"));
        // Empty lists degrade instead of vanishing
        assert!(instruction.contains("- Available Resources: Not specified"));
    }

    #[test]
    fn test_schedule_line_formatting() {
        let instruction = full_bundle().system_instruction(5);
        assert!(instruction.contains("- 09:00: Math (Class 6-B) — Topic: Fractions"));
        assert!(instruction.contains("- 11:00: Science (Class 7)\n"));
    }

    #[test]
    fn test_reflections_keep_only_most_recent() {
        let mut bundle = ContextBundle::default();
        for i in 0..8 {
            bundle.reflections.push(Reflection {
                energy: 1,
                strategy: None,
                notes: Some(format!("note-{}", i)),
            });
        }

        let instruction = bundle.system_instruction(5);
        assert!(!instruction.contains("note-2"));
        assert!(instruction.contains("note-3"));
        assert!(instruction.contains("note-7"));
    }

    #[test]
    fn test_energy_labels() {
        let instruction = full_bundle().system_instruction(5);
        assert!(instruction.contains("- Energy: Low, Strategy: group work"));
        assert!(instruction.contains("- Energy: High, Notes: went great"));
    }

    #[test]
    fn test_bundle_parses_service_json() {
        let json = r#"{
            "profile": {"name": "Ravi", "schoolType": "ICSE", "subjects": ["English"]},
            "timetable": [{"time": "10:00", "className": "8", "subject": "English"}],
            "reflections": [{"energy": 1}]
        }"#;

        let bundle: ContextBundle = serde_json::from_str(json).unwrap();
        let profile = bundle.profile.as_ref().unwrap();
        assert_eq!(profile.school_type, "ICSE");
        assert!(profile.classes.is_empty());
        assert_eq!(bundle.timetable[0].class_name, "8");
        assert_eq!(bundle.reflections[0].energy, 1);
    }
}
