use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const STEP_SELECTION: u8 = 1;
pub const STEP_SCRIPT_REVIEW: u8 = 2;
pub const STEP_CHARACTER_REVIEW: u8 = 3;
pub const STEP_COMIC_ASSEMBLY: u8 = 4;

/// Number of panels in every script.
pub const PANEL_COUNT: usize = 4;

/// Minimum story prompt length (in characters) is strictly greater than this.
pub const MIN_STORY_PROMPT_CHARS: usize = 5;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Style {
    #[serde(rename = "명랑만화")]
    Cheerful,
    #[default]
    #[serde(rename = "웹툰")]
    Webtoon,
    #[serde(rename = "일러스트")]
    Illustration,
    #[serde(rename = "스케치")]
    Sketch,
    #[serde(rename = "사이버펑크")]
    Cyberpunk,
    #[serde(rename = "판타지")]
    Fantasy,
    #[serde(rename = "지브리스타일")]
    Ghibli,
    #[serde(rename = "피카소스타일")]
    Picasso,
}

impl Style {
    pub const ALL: [Style; 8] = [
        Style::Cheerful,
        Style::Webtoon,
        Style::Illustration,
        Style::Sketch,
        Style::Cyberpunk,
        Style::Fantasy,
        Style::Ghibli,
        Style::Picasso,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Style::Cheerful => "명랑만화",
            Style::Webtoon => "웹툰",
            Style::Illustration => "일러스트",
            Style::Sketch => "스케치",
            Style::Cyberpunk => "사이버펑크",
            Style::Fantasy => "판타지",
            Style::Ghibli => "지브리스타일",
            Style::Picasso => "피카소스타일",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Genre {
    #[default]
    #[serde(rename = "일상 공감 및 개그 만화")]
    DailyComedy,
    #[serde(rename = "판타지 모험")]
    FantasyAdventure,
    #[serde(rename = "로맨스")]
    Romance,
    #[serde(rename = "스릴러")]
    Thriller,
    #[serde(rename = "SF")]
    ScienceFiction,
    #[serde(rename = "역사")]
    History,
    #[serde(rename = "액션 어드벤처")]
    Action,
    #[serde(rename = "판타지 로맨스")]
    FantasyRomance,
    #[serde(rename = "미스터리/범죄")]
    Mystery,
    #[serde(rename = "힐링/일상물")]
    Healing,
}

impl Genre {
    pub const ALL: [Genre; 10] = [
        Genre::DailyComedy,
        Genre::FantasyAdventure,
        Genre::Romance,
        Genre::Thriller,
        Genre::ScienceFiction,
        Genre::History,
        Genre::Action,
        Genre::FantasyRomance,
        Genre::Mystery,
        Genre::Healing,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Genre::DailyComedy => "일상 공감 및 개그 만화",
            Genre::FantasyAdventure => "판타지 모험",
            Genre::Romance => "로맨스",
            Genre::Thriller => "스릴러",
            Genre::ScienceFiction => "SF",
            Genre::History => "역사",
            Genre::Action => "액션 어드벤처",
            Genre::FantasyRomance => "판타지 로맨스",
            Genre::Mystery => "미스터리/범죄",
            Genre::Healing => "힐링/일상물",
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Style {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Style::ALL
            .into_iter()
            .find(|style| style.label() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown style: {}", s))
    }
}

impl FromStr for Genre {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Genre::ALL
            .into_iter()
            .find(|genre| genre.label() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown genre: {}", s))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Character {
    pub id: String,
    pub name: String,
    /// Visual appearance, used to keep panels consistent.
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Dialogue {
    pub speaker: String,
    pub text: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Panel {
    pub id: u32,
    pub description: String,
    pub dialogues: Vec<Dialogue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Partial panel edit; `None` fields keep their current value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PanelUpdate {
    pub description: Option<String>,
    pub dialogues: Option<Vec<Dialogue>>,
}

impl PanelUpdate {
    pub fn apply(self, panel: &mut Panel) {
        if let Some(description) = self.description {
            panel.description = description;
        }
        if let Some(dialogues) = self.dialogues {
            panel.dialogues = dialogues;
        }
    }
}

/// Characters and panels produced together by one script generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Script {
    pub characters: Vec<Character>,
    pub panels: Vec<Panel>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WizardState {
    pub step: u8,
    pub style: Style,
    pub genre: Genre,
    pub story_prompt: String,
    pub characters: Vec<Character>,
    pub panels: Vec<Panel>,
    pub is_generating: bool,
}

impl Default for WizardState {
    fn default() -> Self {
        Self {
            step: STEP_SELECTION,
            style: Style::default(),
            genre: Genre::default(),
            story_prompt: String::new(),
            characters: Vec::new(),
            panels: Vec::new(),
            is_generating: false,
        }
    }
}

impl WizardState {
    pub fn is_story_prompt_ready(&self) -> bool {
        self.story_prompt.chars().count() > MIN_STORY_PROMPT_CHARS
    }

    pub fn panel(&self, id: u32) -> Option<&Panel> {
        self.panels.iter().find(|p| p.id == id)
    }

    pub fn character(&self, id: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.id == id)
    }

    /// Steps reachable from the current one: any step up to the current one, or exactly the next one.
    pub fn can_go_to(&self, step: u8) -> bool {
        (STEP_SELECTION..=STEP_COMIC_ASSEMBLY).contains(&step)
            && (step <= self.step || step == self.step + 1)
    }
}
