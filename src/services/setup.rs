use crate::core::config::{Config, GeminiConfig};
use crate::core::error::ComicResult;
use crate::core::io::ArtifactSink;
use crate::core::state::{
    Genre, PanelUpdate, Style, WizardState, STEP_CHARACTER_REVIEW, STEP_COMIC_ASSEMBLY,
    STEP_SCRIPT_REVIEW, STEP_SELECTION,
};
use crate::services::workflow::{ComicWizard, Operation};
use crate::utils::image::Layout;
use anyhow::Result;
use indicatif::ProgressBar;
use inquire::{Confirm, Password, Select, Text};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Asks for the Gemini API key when neither `config.yml` nor the environment provides one.
pub fn run_setup(config: &mut Config) -> Result<()> {
    if !needs_api_key(config) {
        return Ok(());
    }

    println!("Gemini API key not found (config.yml or GEMINI_API_KEY).");
    let key = Password::new("Gemini API key:")
        .without_confirmation()
        .prompt()?;
    config
        .llm
        .gemini
        .get_or_insert_with(GeminiConfig::default)
        .api_key = key.trim().to_string();

    if Confirm::new("Save the key to config.yml?")
        .with_default(false)
        .prompt()?
    {
        config.save()?;
        println!("Configuration saved.");
    }
    Ok(())
}

fn needs_api_key(config: &Config) -> bool {
    config.llm.provider == "gemini"
        && config
            .llm
            .gemini
            .as_ref()
            .map_or(true, |g| g.api_key.trim().is_empty())
}

/// Drives the wizard from the terminal until the user quits.
pub async fn run_session(wizard: &ComicWizard, sink: &dyn ArtifactSink) -> Result<()> {
    loop {
        let state = wizard.state();
        println!();
        println!("{}", step_header(state.step));

        let keep_going = match state.step {
            STEP_SELECTION => selection_view(wizard, &state).await?,
            STEP_SCRIPT_REVIEW => script_view(wizard, &state).await?,
            STEP_CHARACTER_REVIEW => character_view(wizard, &state).await?,
            _ => assembly_view(wizard, &state, sink).await?,
        };
        if !keep_going {
            return Ok(());
        }
    }
}

fn step_header(step: u8) -> String {
    let titles = ["주제 선택", "대본 확인", "캐릭터 생성", "4컷 만화 완성"];
    let bar = titles
        .iter()
        .enumerate()
        .map(|(i, t)| {
            if i as u8 + 1 == step {
                format!("[{}. {}]", i + 1, t)
            } else {
                format!(" {}. {} ", i + 1, t)
            }
        })
        .collect::<Vec<_>>()
        .join(" > ");
    format!("=== {} ===", bar)
}

#[derive(Clone, Copy)]
enum SelectionAction {
    Style,
    Genre,
    Prompt,
    Suggest,
    Generate,
    Quit,
}

impl fmt::Display for SelectionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SelectionAction::Style => "그림 스타일 선택",
            SelectionAction::Genre => "장르 선택",
            SelectionAction::Prompt => "이야기 주제 입력",
            SelectionAction::Suggest => "AI 주제 추천 받기",
            SelectionAction::Generate => "이 주제로 대본 생성하기",
            SelectionAction::Quit => "종료",
        };
        write!(f, "{}", label)
    }
}

async fn selection_view(wizard: &ComicWizard, state: &WizardState) -> Result<bool> {
    println!("스타일: {} | 장르: {}", state.style, state.genre);
    println!(
        "주제: {}",
        if state.story_prompt.is_empty() {
            "(없음)"
        } else {
            &state.story_prompt
        }
    );

    let mut actions = vec![
        SelectionAction::Style,
        SelectionAction::Genre,
        SelectionAction::Prompt,
        SelectionAction::Suggest,
    ];
    if state.is_story_prompt_ready() {
        actions.push(SelectionAction::Generate);
    }
    actions.push(SelectionAction::Quit);

    match Select::new("무엇을 할까요?", actions).prompt()? {
        SelectionAction::Style => {
            let style = Select::new("그림 스타일:", Style::ALL.to_vec()).prompt()?;
            report_edit(wizard.select_style(style));
        }
        SelectionAction::Genre => {
            let genre = Select::new("장르:", Genre::ALL.to_vec()).prompt()?;
            report_edit(wizard.select_genre(genre));
        }
        SelectionAction::Prompt => {
            let prompt = Text::new("이야기 주제 (5자 초과):")
                .with_initial_value(&state.story_prompt)
                .prompt()?;
            report_edit(wizard.set_story_prompt(&prompt));
        }
        SelectionAction::Suggest => {
            let ideas = with_spinner(
                "AI가 주제를 고민하고 있습니다...",
                wizard.suggest_story_ideas(),
            )
            .await;
            if let Some(ideas) = report(Operation::SuggestIdeas, ideas) {
                let idea = Select::new("추천 주제:", ideas).prompt_skippable()?;
                if let Some(idea) = idea {
                    report_edit(wizard.apply_story_idea(&idea));
                }
            }
        }
        SelectionAction::Generate => {
            let result = with_spinner("대본 생성 중...", wizard.generate_script()).await;
            report(Operation::GenerateScript, result);
        }
        SelectionAction::Quit => return Ok(false),
    }
    Ok(true)
}

#[derive(Clone, Copy)]
enum ScriptAction {
    EditScene,
    EditDialogue,
    Regenerate,
    Next,
    Back,
    Quit,
}

impl fmt::Display for ScriptAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScriptAction::EditScene => "장면 설명 수정",
            ScriptAction::EditDialogue => "대사 수정",
            ScriptAction::Regenerate => "대본 다시 생성",
            ScriptAction::Next => "다음 단계: 캐릭터 생성",
            ScriptAction::Back => "이전 단계로",
            ScriptAction::Quit => "종료",
        };
        write!(f, "{}", label)
    }
}

async fn script_view(wizard: &ComicWizard, state: &WizardState) -> Result<bool> {
    print!("{}", describe_script(state));

    let actions = vec![
        ScriptAction::EditScene,
        ScriptAction::EditDialogue,
        ScriptAction::Regenerate,
        ScriptAction::Next,
        ScriptAction::Back,
        ScriptAction::Quit,
    ];
    match Select::new("무엇을 할까요?", actions).prompt()? {
        ScriptAction::EditScene => {
            let panel_id = pick_panel(state)?;
            if let Some(panel) = state.panel(panel_id) {
                let description = Text::new("장면 설명:")
                    .with_initial_value(&panel.description)
                    .prompt()?;
                let update = PanelUpdate {
                    description: Some(description),
                    dialogues: None,
                };
                report_edit(wizard.update_panel(panel_id, update));
            }
        }
        ScriptAction::EditDialogue => {
            let panel_id = pick_panel(state)?;
            let Some(panel) = state.panel(panel_id) else {
                return Ok(true);
            };
            if panel.dialogues.is_empty() {
                println!("이 컷에는 대사가 없습니다.");
                return Ok(true);
            }
            let lines: Vec<String> = panel
                .dialogues
                .iter()
                .enumerate()
                .map(|(i, d)| format!("{}. {}: {}", i + 1, d.speaker, d.text))
                .collect();
            let index = Select::new("수정할 대사:", lines).raw_prompt()?.index;
            let text = Text::new("대사:")
                .with_initial_value(&panel.dialogues[index].text)
                .prompt()?;
            report_edit(wizard.update_dialogue_text(panel_id, index, &text));
        }
        ScriptAction::Regenerate => {
            let result = with_spinner("대본 다시 생성 중...", wizard.generate_script()).await;
            report(Operation::GenerateScript, result);
        }
        ScriptAction::Next => {
            wizard.go_to_step(STEP_CHARACTER_REVIEW);
        }
        ScriptAction::Back => {
            wizard.go_to_step(STEP_SELECTION);
        }
        ScriptAction::Quit => return Ok(false),
    }
    Ok(true)
}

fn describe_script(state: &WizardState) -> String {
    let mut out = String::from("등장인물\n");
    for c in &state.characters {
        out.push_str(&format!("  - {}: {}\n", c.name, c.description));
    }
    for p in &state.panels {
        out.push_str(&format!("#{} {}\n", p.id, p.description));
        for d in &p.dialogues {
            out.push_str(&format!("    {}: {}\n", d.speaker, d.text));
        }
    }
    out
}

fn pick_panel(state: &WizardState) -> Result<u32> {
    let ids: Vec<u32> = state.panels.iter().map(|p| p.id).collect();
    Ok(Select::new("컷 번호:", ids).prompt()?)
}

#[derive(Clone, Copy)]
enum CharacterAction {
    GenerateOne,
    GenerateAll,
    Next,
    Back,
    Quit,
}

impl fmt::Display for CharacterAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CharacterAction::GenerateOne => "캐릭터 한 명 생성",
            CharacterAction::GenerateAll => "모든 캐릭터 생성",
            CharacterAction::Next => "다음 단계: 만화 완성",
            CharacterAction::Back => "이전 단계로",
            CharacterAction::Quit => "종료",
        };
        write!(f, "{}", label)
    }
}

async fn character_view(wizard: &ComicWizard, state: &WizardState) -> Result<bool> {
    for c in &state.characters {
        println!("  [{}] {} - {}", image_mark(&c.image_url), c.name, c.description);
    }

    let actions = vec![
        CharacterAction::GenerateOne,
        CharacterAction::GenerateAll,
        CharacterAction::Next,
        CharacterAction::Back,
        CharacterAction::Quit,
    ];
    match Select::new("무엇을 할까요?", actions).prompt()? {
        CharacterAction::GenerateOne => {
            let names: Vec<String> = state.characters.iter().map(|c| c.name.clone()).collect();
            let index = Select::new("캐릭터:", names).raw_prompt()?.index;
            let id = state.characters[index].id.clone();
            let result = with_spinner(
                "캐릭터 이미지 생성 중...",
                wizard.generate_character_image(&id),
            )
            .await;
            report(Operation::GenerateCharacterImage, result);
        }
        CharacterAction::GenerateAll => {
            if let Some(n) = report(
                Operation::GenerateAllCharacterImages,
                wizard.generate_all_character_images().await,
            ) {
                println!("{}명의 캐릭터 이미지를 생성했습니다.", n);
            }
        }
        CharacterAction::Next => {
            wizard.go_to_step(STEP_COMIC_ASSEMBLY);
        }
        CharacterAction::Back => {
            wizard.go_to_step(STEP_SCRIPT_REVIEW);
        }
        CharacterAction::Quit => return Ok(false),
    }
    Ok(true)
}

#[derive(Clone, Copy)]
enum AssemblyAction {
    GenerateOne,
    GenerateAll,
    Export,
    Back,
    Quit,
}

impl fmt::Display for AssemblyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AssemblyAction::GenerateOne => "컷 이미지 하나 생성",
            AssemblyAction::GenerateAll => "모든 이미지 한번에 생성",
            AssemblyAction::Export => "이미지 저장",
            AssemblyAction::Back => "이전 단계로",
            AssemblyAction::Quit => "종료",
        };
        write!(f, "{}", label)
    }
}

async fn assembly_view(
    wizard: &ComicWizard,
    state: &WizardState,
    sink: &dyn ArtifactSink,
) -> Result<bool> {
    for p in &state.panels {
        println!("  [{}] Panel {} - {}", image_mark(&p.image_url), p.id, p.description);
    }

    let actions = vec![
        AssemblyAction::GenerateOne,
        AssemblyAction::GenerateAll,
        AssemblyAction::Export,
        AssemblyAction::Back,
        AssemblyAction::Quit,
    ];
    match Select::new("무엇을 할까요?", actions).prompt()? {
        AssemblyAction::GenerateOne => {
            let panel_id = pick_panel(state)?;
            let result =
                with_spinner("컷 이미지 생성 중...", wizard.generate_panel_image(panel_id)).await;
            report(Operation::GeneratePanelImage, result);
        }
        AssemblyAction::GenerateAll => {
            if let Some(n) = report(
                Operation::GenerateAllPanelImages,
                wizard.generate_all_panel_images().await,
            ) {
                println!("{}개의 컷 이미지를 생성했습니다.", n);
            }
        }
        AssemblyAction::Export => {
            let layout = Select::new("레이아웃:", Layout::ALL.to_vec()).prompt()?;
            if let Some(files) = report(Operation::Export, wizard.export(layout, sink).await) {
                println!("저장됨: {}", files.join(", "));
            }
        }
        AssemblyAction::Back => {
            wizard.go_to_step(STEP_CHARACTER_REVIEW);
        }
        AssemblyAction::Quit => return Ok(false),
    }
    Ok(true)
}

fn image_mark(image_url: &Option<String>) -> &'static str {
    if image_url.is_some() {
        "O"
    } else {
        " "
    }
}

async fn with_spinner<T>(message: &'static str, work: impl Future<Output = T>) -> T {
    let spinner = ProgressBar::new_spinner();
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    let result = work.await;
    spinner.finish_and_clear();
    result
}

/// Prints the user-facing notice for a failed operation and swallows the error.
fn report<T>(op: Operation, result: ComicResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            eprintln!("{}", op.notice_for(&e));
            None
        }
    }
}

fn report_edit(result: ComicResult<()>) {
    if let Err(e) = result {
        eprintln!("{}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{Character, Dialogue, Panel};

    #[test]
    fn test_needs_api_key() {
        let mut config = Config::default();
        config.llm.gemini.as_mut().unwrap().api_key = String::new();
        assert!(needs_api_key(&config));

        config.llm.gemini.as_mut().unwrap().api_key = "abc".to_string();
        assert!(!needs_api_key(&config));

        config.llm.gemini = None;
        assert!(needs_api_key(&config));
    }

    #[test]
    fn test_step_header_marks_current_step() {
        let header = step_header(STEP_CHARACTER_REVIEW);
        assert!(header.contains("[3. 캐릭터 생성]"));
        assert!(header.contains(" 1. 주제 선택 "));
    }

    #[test]
    fn test_describe_script_lists_dialogue_under_panel() {
        let state = WizardState {
            characters: vec![Character {
                id: "char_0".to_string(),
                name: "하늘".to_string(),
                description: "빨간 목도리".to_string(),
                image_url: None,
            }],
            panels: vec![Panel {
                id: 1,
                description: "정류장".to_string(),
                dialogues: vec![Dialogue {
                    speaker: "하늘".to_string(),
                    text: "비다".to_string(),
                }],
                image_url: None,
            }],
            ..WizardState::default()
        };
        let text = describe_script(&state);
        assert!(text.contains("  - 하늘: 빨간 목도리\n"));
        assert!(text.contains("#1 정류장\n    하늘: 비다\n"));
    }
}
