use crate::core::error::{ComicError, ComicResult};
use crate::core::state::{Character, Genre, Panel, Script, Style};
use crate::services::llm::{ImageGenerator, TextGenerator, TextRequest};
use crate::services::script;
use log::{debug, info};

pub async fn suggest_story_ideas(
    llm: &dyn TextGenerator,
    style: Style,
    genre: Genre,
    count: usize,
) -> ComicResult<Vec<String>> {
    let request = TextRequest {
        system: None,
        prompt: script::ideas_prompt(style, genre, count),
        schema: Some(script::ideas_schema()),
    };
    let response = llm
        .generate_text(&request)
        .await
        .map_err(ComicError::from_transport)?;

    let mut ideas = script::parse_story_ideas(&response)?;
    ideas.truncate(count);
    if ideas.is_empty() {
        return Err(ComicError::generation("no story ideas returned"));
    }
    info!("Received {} story ideas", ideas.len());
    Ok(ideas)
}

pub async fn generate_script(
    llm: &dyn TextGenerator,
    style: Style,
    genre: Genre,
    story_prompt: &str,
) -> ComicResult<Script> {
    let request = TextRequest {
        system: Some(script::script_system_instruction()),
        prompt: script::script_prompt(style, genre, story_prompt),
        schema: Some(script::script_schema()),
    };
    let response = llm
        .generate_text(&request)
        .await
        .map_err(ComicError::from_transport)?;

    let parsed = script::parse_script(&response)?;
    info!(
        "Script ready: {} characters, {} panels",
        parsed.characters.len(),
        parsed.panels.len()
    );
    Ok(parsed)
}

pub async fn generate_image_from_prompt(
    painter: &dyn ImageGenerator,
    subject: &str,
    style: Style,
) -> ComicResult<String> {
    let prompt = script::image_prompt(subject, style);
    debug!("Image prompt: {}", prompt);

    let uri = painter
        .generate_image(&prompt)
        .await
        .map_err(ComicError::from_transport)?;
    if !uri.starts_with("data:") || !uri.contains(";base64,") {
        return Err(ComicError::generation("no image produced"));
    }
    Ok(uri)
}

pub async fn generate_character_image(
    painter: &dyn ImageGenerator,
    character: &Character,
    style: Style,
) -> ComicResult<String> {
    generate_image_from_prompt(painter, &script::character_image_subject(character), style).await
}

pub async fn generate_panel_image(
    painter: &dyn ImageGenerator,
    panel: &Panel,
    characters: &[Character],
    style: Style,
) -> ComicResult<String> {
    generate_image_from_prompt(
        painter,
        &script::panel_image_subject(panel, characters),
        style,
    )
    .await
}
