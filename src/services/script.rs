//! Prompt construction and response parsing for the comic script model.
//!
//! Everything here is pure: prompts in, text out, and the text is validated into
//! domain types before it can reach the wizard state.

use crate::core::error::{ComicError, ComicResult};
use crate::core::state::{Character, Dialogue, Genre, Panel, Script, Style, PANEL_COUNT};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;

/// Removes a markdown code fence (```json ... ``` or ``` ... ```) wrapping the whole body.
/// Anything else is returned trimmed, backticks inside JSON strings included.
pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    let Some(after_fence) = s.strip_prefix("```") else {
        return s.to_string();
    };
    let body = after_fence
        .strip_prefix("json")
        .or_else(|| after_fence.strip_prefix("JSON"))
        .unwrap_or(after_fence);
    body.strip_suffix("```").unwrap_or(body).trim().to_string()
}

pub fn ideas_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": { "type": "STRING" }
    })
}

pub fn ideas_prompt(style: Style, genre: Genre, count: usize) -> String {
    format!(
        "4컷 만화를 위한 독창적이고 재미있는 스토리 아이디어 {}개를 제안해주세요.\n\
        스타일: {}\n\
        장르: {}\n\n\
        결과는 반드시 JSON 문자열 배열 형식이어야 합니다.\n\
        각 문자열은 스토리를 한 문장으로 요약한 한국어 문장이어야 합니다.\n\
        예시: [\"코딩을 배우는 강아지의 좌충우돌 이야기\", \"오늘 저녁 메뉴를 두고 다투는 커플의 로맨스\"]",
        count, style, genre
    )
}

pub fn parse_story_ideas(response: &str) -> ComicResult<Vec<String>> {
    let clean_json = strip_code_blocks(response);
    let ideas: Vec<String> = serde_json::from_str(&clean_json).map_err(|e| {
        ComicError::generation(format!("Failed to parse idea list: {}. Body: {}", e, clean_json))
    })?;

    let ideas: Vec<String> = ideas
        .into_iter()
        .map(|idea| idea.trim().to_string())
        .filter(|idea| !idea.is_empty())
        .collect();

    if ideas.is_empty() {
        return Err(ComicError::generation("Model returned no story ideas"));
    }
    Ok(ideas)
}

pub fn script_system_instruction() -> String {
    "당신은 전문 웹툰 작가입니다.\n\
    사용자의 요청에 따라 재미있고 매력적인 4컷 만화 대본을 작성하세요.\n\n\
    규칙:\n\
    1. 반드시 JSON 형식으로 출력하세요.\n\
    2. 정확히 4개의 컷(panel)을 구성하세요.\n\
    3. 모든 등장인물 설명, 장면 묘사, 대사는 '한국어'로 작성하세요.\n\
    4. 등장인물 묘사는 외모(머리스타일, 옷, 특징 등)를 구체적으로 묘사하세요.\n\
    5. 대사의 speaker는 반드시 characters에 있는 이름 중 하나여야 합니다."
        .to_string()
}

pub fn script_prompt(style: Style, genre: Genre, story_prompt: &str) -> String {
    format!(
        "스타일: {}\n\
        장르: {}\n\
        스토리 아이디어: {}\n\n\
        다음 구조를 가진 JSON을 생성하세요:\n\
        {{\n\
          \"characters\": [\n\
            {{ \"name\": \"이름\", \"description\": \"구체적인 외모 묘사\" }}\n\
          ],\n\
          \"panels\": [\n\
            {{\n\
              \"panel_number\": 1,\n\
              \"scene_description\": \"구체적인 장면 묘사\",\n\
              \"dialogue\": [\n\
                {{ \"speaker\": \"이름\", \"text\": \"대사\" }}\n\
              ]\n\
            }}\n\
          ]\n\
        }}",
        style, genre, story_prompt
    )
}

pub fn script_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "characters": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "name": { "type": "STRING" },
                        "description": { "type": "STRING" }
                    },
                    "required": ["name", "description"]
                }
            },
            "panels": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "panel_number": { "type": "INTEGER" },
                        "scene_description": { "type": "STRING" },
                        "dialogue": {
                            "type": "ARRAY",
                            "items": {
                                "type": "OBJECT",
                                "properties": {
                                    "speaker": { "type": "STRING" },
                                    "text": { "type": "STRING" }
                                },
                                "required": ["speaker", "text"]
                            }
                        }
                    },
                    "required": ["panel_number", "scene_description", "dialogue"]
                }
            }
        },
        "required": ["characters", "panels"]
    })
}

#[derive(Deserialize)]
struct RawScript {
    characters: Vec<RawCharacter>,
    panels: Vec<RawPanel>,
}

#[derive(Deserialize)]
struct RawCharacter {
    name: String,
    description: String,
}

#[derive(Deserialize)]
struct RawPanel {
    panel_number: u32,
    scene_description: String,
    dialogue: Vec<RawDialogue>,
}

#[derive(Deserialize)]
struct RawDialogue {
    speaker: String,
    text: String,
}

/// Parses and validates a script answer. Panel numbers become panel ids, array
/// positions become character ids (`char_0`, `char_1`, ...).
pub fn parse_script(response: &str) -> ComicResult<Script> {
    let clean_json = strip_code_blocks(response);
    let raw: RawScript = serde_json::from_str(&clean_json).map_err(|e| {
        ComicError::generation(format!("Failed to parse script JSON: {}. Body: {}", e, clean_json))
    })?;

    if raw.characters.is_empty() {
        return Err(ComicError::generation("Script has no characters"));
    }

    let mut names = HashSet::new();
    let mut characters = Vec::with_capacity(raw.characters.len());
    for (i, c) in raw.characters.into_iter().enumerate() {
        let name = c.name.trim().to_string();
        let description = c.description.trim().to_string();
        if name.is_empty() || description.is_empty() {
            return Err(ComicError::generation(format!(
                "Character #{} is missing a name or description",
                i
            )));
        }
        if !names.insert(name.clone()) {
            return Err(ComicError::generation(format!(
                "Duplicate character name: {}",
                name
            )));
        }
        characters.push(Character {
            id: format!("char_{}", i),
            name,
            description,
            image_url: None,
        });
    }

    if raw.panels.len() != PANEL_COUNT {
        return Err(ComicError::generation(format!(
            "Expected exactly {} panels, got {}",
            PANEL_COUNT,
            raw.panels.len()
        )));
    }

    let mut panels = Vec::with_capacity(PANEL_COUNT);
    for p in raw.panels {
        let description = p.scene_description.trim().to_string();
        if description.is_empty() {
            return Err(ComicError::generation(format!(
                "Panel {} has no scene description",
                p.panel_number
            )));
        }

        let mut dialogues = Vec::with_capacity(p.dialogue.len());
        for d in p.dialogue {
            let speaker = d.speaker.trim().to_string();
            if !names.contains(&speaker) {
                return Err(ComicError::generation(format!(
                    "Panel {} has a line by unknown speaker '{}'",
                    p.panel_number, speaker
                )));
            }
            dialogues.push(Dialogue {
                speaker,
                text: d.text,
            });
        }

        panels.push(Panel {
            id: p.panel_number,
            description,
            dialogues,
            image_url: None,
        });
    }

    panels.sort_by_key(|p| p.id);
    let ids_ok = panels
        .iter()
        .enumerate()
        .all(|(i, p)| p.id as usize == i + 1);
    if !ids_ok {
        let ids: Vec<u32> = panels.iter().map(|p| p.id).collect();
        return Err(ComicError::generation(format!(
            "Panel numbers must be 1..={} without duplicates, got {:?}",
            PANEL_COUNT, ids
        )));
    }

    Ok(Script { characters, panels })
}

pub fn image_prompt(subject: &str, style: Style) -> String {
    format!(
        "{} style. {}. High quality, detailed, anime/webtoon aesthetic.",
        style, subject
    )
}

pub fn character_image_subject(character: &Character) -> String {
    format!(
        "Character design sheet for {}. {}. Full body, white background",
        character.name, character.description
    )
}

/// Panel subject with every character's appearance inlined for visual consistency.
pub fn panel_image_subject(panel: &Panel, characters: &[Character]) -> String {
    let character_context = characters
        .iter()
        .map(|c| format!("{} is {}", c.name, c.description))
        .collect::<Vec<_>>()
        .join(". ");

    format!(
        "Panel {}. Scene: {}. Characters: [{}]. Action shot, dynamic composition",
        panel.id, panel.description, character_context
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_SCRIPT: &str = r#"{
        "characters": [
            { "name": "민수", "description": "짧은 검은 머리, 파란 후드티" },
            { "name": "지은", "description": "긴 갈색 머리, 노란 우비" }
        ],
        "panels": [
            { "panel_number": 2, "scene_description": "우산 하나를 발견한다", "dialogue": [ { "speaker": "지은", "text": "우산 하나뿐이네?" } ] },
            { "panel_number": 1, "scene_description": "비 오는 버스 정류장", "dialogue": [ { "speaker": "민수", "text": "비가 오네..." } ] },
            { "panel_number": 3, "scene_description": "같이 우산을 쓴다", "dialogue": [] },
            { "panel_number": 4, "scene_description": "무지개가 뜬다", "dialogue": [ { "speaker": "민수", "text": "같이 가요" }, { "speaker": "지은", "text": "좋아요" } ] }
        ]
    }"#;

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("json"), "json");
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("  ```json  \n  {}  \n  ```  "), "{}");
        assert_eq!(strip_code_blocks("```json\n[\"a\"]"), "[\"a\"]");
    }

    #[test]
    fn test_parse_script_assigns_ids_and_orders_panels() {
        let script = parse_script(SAMPLE_SCRIPT).unwrap();
        assert_eq!(script.characters.len(), 2);
        assert_eq!(script.characters[0].id, "char_0");
        assert_eq!(script.characters[1].id, "char_1");

        let ids: Vec<u32> = script.panels.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(script.panels[0].description, "비 오는 버스 정류장");

        let names: HashSet<&str> = script.characters.iter().map(|c| c.name.as_str()).collect();
        for panel in &script.panels {
            assert!(panel.image_url.is_none());
            for d in &panel.dialogues {
                assert!(names.contains(d.speaker.as_str()));
            }
        }
    }

    #[test]
    fn test_unfenced_script_keeps_backticks_in_dialogue() {
        let body = SAMPLE_SCRIPT.replace("비가 오네...", "```코드``` 가 또 깨졌어");
        assert_eq!(strip_code_blocks(&body), body.trim());

        let script = parse_script(&body).unwrap();
        assert_eq!(script.panels[0].dialogues[0].text, "```코드``` 가 또 깨졌어");
    }

    #[test]
    fn test_parse_script_accepts_fenced_body() {
        let fenced = format!("```json\n{}\n```", SAMPLE_SCRIPT);
        assert!(parse_script(&fenced).is_ok());
    }

    #[test]
    fn test_parse_script_rejects_wrong_panel_count() {
        let three = r#"{
            "characters": [ { "name": "A", "description": "tall" } ],
            "panels": [
                { "panel_number": 1, "scene_description": "x", "dialogue": [] },
                { "panel_number": 2, "scene_description": "y", "dialogue": [] },
                { "panel_number": 3, "scene_description": "z", "dialogue": [] }
            ]
        }"#;
        let err = parse_script(three).unwrap_err();
        assert!(matches!(err, ComicError::Generation(_)));
        assert!(err.to_string().contains("got 3"));
    }

    #[test]
    fn test_parse_script_rejects_duplicate_panel_numbers() {
        let dup = r#"{
            "characters": [ { "name": "A", "description": "tall" } ],
            "panels": [
                { "panel_number": 1, "scene_description": "x", "dialogue": [] },
                { "panel_number": 1, "scene_description": "y", "dialogue": [] },
                { "panel_number": 3, "scene_description": "z", "dialogue": [] },
                { "panel_number": 4, "scene_description": "w", "dialogue": [] }
            ]
        }"#;
        assert!(matches!(parse_script(dup), Err(ComicError::Generation(_))));
    }

    #[test]
    fn test_parse_script_rejects_unknown_speaker() {
        let bad = SAMPLE_SCRIPT.replace("\"speaker\": \"지은\", \"text\": \"좋아요\"", "\"speaker\": \"철수\", \"text\": \"좋아요\"");
        let err = parse_script(&bad).unwrap_err();
        assert!(err.to_string().contains("철수"));
    }

    #[test]
    fn test_parse_script_rejects_missing_fields() {
        let missing = r#"{ "characters": [ { "name": "A" } ], "panels": [] }"#;
        assert!(matches!(parse_script(missing), Err(ComicError::Generation(_))));
        assert!(matches!(parse_script("not json"), Err(ComicError::Generation(_))));
    }

    #[test]
    fn test_parse_story_ideas() {
        let ideas = parse_story_ideas("```json\n[\"고양이의 출근길\", \"  \", \"로봇의 첫 데이트\"]\n```").unwrap();
        assert_eq!(ideas, vec!["고양이의 출근길", "로봇의 첫 데이트"]);
        assert!(parse_story_ideas("[]").is_err());
        assert!(parse_story_ideas("{\"ideas\": []}").is_err());
    }

    #[test]
    fn test_panel_subject_includes_every_character() {
        let script = parse_script(SAMPLE_SCRIPT).unwrap();
        let subject = panel_image_subject(&script.panels[2], &script.characters);
        assert!(subject.starts_with("Panel 3. Scene: 같이 우산을 쓴다."));
        assert!(subject.contains("민수 is 짧은 검은 머리, 파란 후드티. 지은 is 긴 갈색 머리, 노란 우비"));

        let prompt = image_prompt(&subject, Style::Webtoon);
        assert!(prompt.starts_with("웹툰 style. Panel 3."));
        assert!(prompt.ends_with("High quality, detailed, anime/webtoon aesthetic."));
    }

    #[test]
    fn test_character_subject_is_reference_sheet() {
        let script = parse_script(SAMPLE_SCRIPT).unwrap();
        let subject = character_image_subject(&script.characters[0]);
        assert_eq!(
            subject,
            "Character design sheet for 민수. 짧은 검은 머리, 파란 후드티. Full body, white background"
        );
    }

    #[test]
    fn test_prompts_carry_selections() {
        let p = script_prompt(Style::Sketch, Genre::Romance, "두 사람이 우산을 같이 쓰는 이야기");
        assert!(p.contains("스타일: 스케치"));
        assert!(p.contains("장르: 로맨스"));
        assert!(p.contains("두 사람이 우산을 같이 쓰는 이야기"));
        assert!(ideas_prompt(Style::Webtoon, Genre::Healing, 5).contains("5개"));
        assert_eq!(script_schema()["required"], json!(["characters", "panels"]));
    }
}
