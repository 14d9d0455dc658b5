use crate::core::config::GenerationConfig;
use crate::core::error::{ComicError, ComicResult};
use crate::core::io::ArtifactSink;
use crate::core::state::{
    Dialogue, Genre, PanelUpdate, Style, WizardState, STEP_SCRIPT_REVIEW, STEP_SELECTION,
};
use crate::services::generation;
use crate::services::llm::Generators;
use crate::utils::image::{ComicArtifact, Compositor, Layout};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// User-initiated operations that can fail with a notice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    SuggestIdeas,
    GenerateScript,
    GenerateCharacterImage,
    GenerateAllCharacterImages,
    GeneratePanelImage,
    GenerateAllPanelImages,
    Export,
}

impl Operation {
    pub fn failure_notice(&self) -> &'static str {
        match self {
            Operation::SuggestIdeas => "주제 추천 중 오류가 발생했습니다.",
            Operation::GenerateScript => {
                "대본 생성 중 오류가 발생했습니다. 잠시 후 다시 시도해주세요."
            }
            Operation::GenerateCharacterImage => "캐릭터 생성 실패",
            Operation::GenerateAllCharacterImages => {
                "캐릭터 일괄 생성 중 일부 실패가 발생했습니다."
            }
            Operation::GeneratePanelImage => "패널 생성 실패",
            Operation::GenerateAllPanelImages => "이미지 생성 중 오류 발생",
            Operation::Export => "이미지 저장 중 오류가 발생했습니다.",
        }
    }

    /// Notice shown to the user for `err`, in the interface language.
    pub fn notice_for(&self, err: &ComicError) -> String {
        match err {
            ComicError::Busy => "다른 생성 작업이 진행 중입니다. 잠시만 기다려주세요.".to_string(),
            ComicError::Validation(msg) => format!("{} ({})", self.failure_notice(), msg),
            ComicError::Composition(_) if *self == Operation::Export && is_empty_export(err) => {
                "생성된 이미지가 없습니다.".to_string()
            }
            _ => self.failure_notice().to_string(),
        }
    }
}

fn is_empty_export(err: &ComicError) -> bool {
    matches!(err, ComicError::Composition(msg) if msg.starts_with("no panel images"))
}

/// Holds the in-flight flag for the duration of one generation operation.
struct InFlightGuard<'a> {
    state: &'a Mutex<WizardState>,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(state: &'a Mutex<WizardState>) -> ComicResult<Self> {
        let mut s = lock(state);
        if s.is_generating {
            return Err(ComicError::Busy);
        }
        s.is_generating = true;
        Ok(Self { state })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.state).is_generating = false;
    }
}

fn lock(state: &Mutex<WizardState>) -> MutexGuard<'_, WizardState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns the wizard state and exposes the closed set of transitions the step views dispatch.
///
/// Every method takes `&self`; the state lock is never held across an await, so the
/// wizard can be shared behind an `Arc` and a concurrent generation fails with
/// [`ComicError::Busy`].
pub struct ComicWizard {
    state: Mutex<WizardState>,
    generators: Generators,
    compositor: Compositor,
    settings: GenerationConfig,
}

impl ComicWizard {
    pub fn new(generators: Generators, compositor: Compositor, settings: GenerationConfig) -> Self {
        Self {
            state: Mutex::new(WizardState::default()),
            generators,
            compositor,
            settings,
        }
    }

    /// Snapshot of the current state for rendering.
    pub fn state(&self) -> WizardState {
        lock(&self.state).clone()
    }

    pub fn select_style(&self, style: Style) -> ComicResult<()> {
        let mut state = self.selection_state()?;
        state.style = style;
        Ok(())
    }

    pub fn select_genre(&self, genre: Genre) -> ComicResult<()> {
        let mut state = self.selection_state()?;
        state.genre = genre;
        Ok(())
    }

    pub fn set_story_prompt(&self, prompt: &str) -> ComicResult<()> {
        let mut state = self.selection_state()?;
        state.story_prompt = prompt.to_string();
        Ok(())
    }

    /// Copies a suggested idea into the story prompt.
    pub fn apply_story_idea(&self, idea: &str) -> ComicResult<()> {
        self.set_story_prompt(idea.trim())
    }

    fn selection_state(&self) -> ComicResult<MutexGuard<'_, WizardState>> {
        let state = lock(&self.state);
        if state.step != STEP_SELECTION {
            return Err(ComicError::validation(format!(
                "selections can only change at step {}, current step is {}",
                STEP_SELECTION, state.step
            )));
        }
        Ok(state)
    }

    /// Moves to `step` when it is at or behind the current one, or exactly one ahead.
    /// Anything else is ignored; returns whether the step changed.
    pub fn go_to_step(&self, step: u8) -> bool {
        let mut state = lock(&self.state);
        if !state.can_go_to(step) {
            info!("Ignoring jump from step {} to {}", state.step, step);
            return false;
        }
        state.step = step;
        true
    }

    pub async fn suggest_story_ideas(&self) -> ComicResult<Vec<String>> {
        let op = Operation::SuggestIdeas;
        let _guard = InFlightGuard::acquire(&self.state)?;
        let (style, genre) = {
            let state = lock(&self.state);
            (state.style, state.genre)
        };

        info!("Suggesting story ideas for {} / {}", style, genre);
        let result = generation::suggest_story_ideas(
            self.generators.text.as_ref(),
            style,
            genre,
            self.settings.idea_count,
        )
        .await;
        log_outcome(op, result)
    }

    /// Replaces characters and panels with a freshly generated script and moves to step 2.
    pub async fn generate_script(&self) -> ComicResult<()> {
        let op = Operation::GenerateScript;
        let (style, genre, prompt) = {
            let state = lock(&self.state);
            if !state.is_story_prompt_ready() {
                return Err(ComicError::validation(
                    "story prompt must be longer than 5 characters",
                ));
            }
            (state.style, state.genre, state.story_prompt.clone())
        };
        let _guard = InFlightGuard::acquire(&self.state)?;

        info!("Generating script ({} / {})", style, genre);
        let script = log_outcome(
            op,
            generation::generate_script(self.generators.text.as_ref(), style, genre, &prompt).await,
        )?;

        let mut state = lock(&self.state);
        state.characters = script.characters;
        state.panels = script.panels;
        state.step = STEP_SCRIPT_REVIEW;
        Ok(())
    }

    pub fn update_panel(&self, panel_id: u32, update: PanelUpdate) -> ComicResult<()> {
        let mut state = lock(&self.state);
        let panel = state
            .panels
            .iter_mut()
            .find(|p| p.id == panel_id)
            .ok_or_else(|| ComicError::validation(format!("no panel with id {}", panel_id)))?;
        update.apply(panel);
        Ok(())
    }

    pub fn update_dialogue_text(
        &self,
        panel_id: u32,
        dialogue_index: usize,
        text: &str,
    ) -> ComicResult<()> {
        let mut state = lock(&self.state);
        let panel = state
            .panels
            .iter_mut()
            .find(|p| p.id == panel_id)
            .ok_or_else(|| ComicError::validation(format!("no panel with id {}", panel_id)))?;
        let dialogue: &mut Dialogue = panel.dialogues.get_mut(dialogue_index).ok_or_else(|| {
            ComicError::validation(format!(
                "panel {} has no dialogue #{}",
                panel_id, dialogue_index
            ))
        })?;
        dialogue.text = text.to_string();
        Ok(())
    }

    pub async fn generate_character_image(&self, character_id: &str) -> ComicResult<()> {
        let op = Operation::GenerateCharacterImage;
        let (character, style) = {
            let state = lock(&self.state);
            let character = state.character(character_id).cloned().ok_or_else(|| {
                ComicError::validation(format!("no character with id {}", character_id))
            })?;
            (character, state.style)
        };
        let _guard = InFlightGuard::acquire(&self.state)?;

        info!("Generating reference image for {}", character.name);
        let url = log_outcome(
            op,
            generation::generate_character_image(
                self.generators.image.as_ref(),
                &character,
                style,
            )
            .await,
        )?;

        let mut state = lock(&self.state);
        if let Some(c) = state.characters.iter_mut().find(|c| c.id == character.id) {
            c.image_url = Some(url);
        }
        Ok(())
    }

    /// Generates images for every character still lacking one. Returns how many were generated.
    /// Results are applied only when every request succeeds.
    pub async fn generate_all_character_images(&self) -> ComicResult<usize> {
        let op = Operation::GenerateAllCharacterImages;
        let _guard = InFlightGuard::acquire(&self.state)?;
        let (pending, style) = {
            let state = lock(&self.state);
            let pending: Vec<_> = state
                .characters
                .iter()
                .filter(|c| c.image_url.is_none())
                .cloned()
                .collect();
            (pending, state.style)
        };
        if pending.is_empty() {
            info!("All characters already have images");
            return Ok(0);
        }

        info!("Generating {} character images", pending.len());
        let pb = progress_bar(pending.len())?;
        let painter = &self.generators.image;
        let results: Vec<ComicResult<(String, String)>> = futures_util::stream::iter(pending)
            .map(|character| {
                let pb = pb.clone();
                async move {
                    let url =
                        generation::generate_character_image(painter.as_ref(), &character, style)
                            .await?;
                    pb.inc(1);
                    Ok::<_, ComicError>((character.id, url))
                }
            })
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .collect()
            .await;
        pb.finish_and_clear();

        let updates = log_outcome(op, collect_all(results))?;
        let count = updates.len();
        let mut state = lock(&self.state);
        for c in state.characters.iter_mut() {
            if let Some(url) = updates.get(&c.id) {
                c.image_url = Some(url.clone());
            }
        }
        Ok(count)
    }

    pub async fn generate_panel_image(&self, panel_id: u32) -> ComicResult<()> {
        let op = Operation::GeneratePanelImage;
        let (panel, roster, style) = {
            let state = lock(&self.state);
            let panel = state
                .panel(panel_id)
                .cloned()
                .ok_or_else(|| ComicError::validation(format!("no panel with id {}", panel_id)))?;
            (panel, state.characters.clone(), state.style)
        };
        let _guard = InFlightGuard::acquire(&self.state)?;

        info!("Generating image for panel {}", panel.id);
        let url = log_outcome(
            op,
            generation::generate_panel_image(self.generators.image.as_ref(), &panel, &roster, style)
                .await,
        )?;

        let mut state = lock(&self.state);
        if let Some(p) = state.panels.iter_mut().find(|p| p.id == panel.id) {
            p.image_url = Some(url);
        }
        Ok(())
    }

    /// Panel counterpart of [`Self::generate_all_character_images`].
    pub async fn generate_all_panel_images(&self) -> ComicResult<usize> {
        let op = Operation::GenerateAllPanelImages;
        let _guard = InFlightGuard::acquire(&self.state)?;
        let (pending, roster, style) = {
            let state = lock(&self.state);
            if state.panels.is_empty() {
                return Err(ComicError::validation("no script has been generated yet"));
            }
            let pending: Vec<_> = state
                .panels
                .iter()
                .filter(|p| p.image_url.is_none())
                .cloned()
                .collect();
            (pending, state.characters.clone(), state.style)
        };
        if pending.is_empty() {
            info!("All panels already have images");
            return Ok(0);
        }

        info!("Generating {} panel images", pending.len());
        let pb = progress_bar(pending.len())?;
        let painter = &self.generators.image;
        let roster = &roster;
        let results: Vec<ComicResult<(u32, String)>> = futures_util::stream::iter(pending)
            .map(|panel| {
                let pb = pb.clone();
                async move {
                    let url =
                        generation::generate_panel_image(painter.as_ref(), &panel, roster, style)
                            .await?;
                    pb.inc(1);
                    Ok::<_, ComicError>((panel.id, url))
                }
            })
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .collect()
            .await;
        pb.finish_and_clear();

        let updates = log_outcome(op, collect_all(results))?;
        let count = updates.len();
        let mut state = lock(&self.state);
        for p in state.panels.iter_mut() {
            if let Some(url) = updates.get(&p.id) {
                p.image_url = Some(url.clone());
            }
        }
        Ok(count)
    }

    /// Renders panels that have images without saving them.
    pub async fn compose(&self, layout: Layout) -> ComicResult<Vec<ComicArtifact>> {
        let panels = lock(&self.state).panels.clone();
        self.compositor.render(&panels, layout).await
    }

    /// Renders and hands every artifact to `sink`. Returns the filenames written.
    pub async fn export(&self, layout: Layout, sink: &dyn ArtifactSink) -> ComicResult<Vec<String>> {
        let op = Operation::Export;
        let artifacts = log_outcome(op, self.compose(layout).await)?;

        let mut written = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            if let Err(e) = sink.save(&artifact.image, &artifact.filename).await {
                error!("{:?} failed while saving {}: {:#}", op, artifact.filename, e);
                return Err(e.into());
            }
            written.push(artifact.filename);
        }
        info!("Exported {} file(s) as {}", written.len(), layout);
        Ok(written)
    }
}

fn progress_bar(len: usize) -> ComicResult<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .map_err(anyhow::Error::from)?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Folds fan-out results into one map, failing if any single request failed.
fn collect_all<K: std::hash::Hash + Eq>(
    results: Vec<ComicResult<(K, String)>>,
) -> ComicResult<HashMap<K, String>> {
    let total = results.len();
    let mut updates = HashMap::with_capacity(total);
    let mut first_error = None;
    let mut failed = 0;
    for res in results {
        match res {
            Ok((key, url)) => {
                updates.insert(key, url);
            }
            Err(e) => {
                failed += 1;
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => {
            warn!("{} of {} requests failed, discarding all results", failed, total);
            Err(e)
        }
        None => Ok(updates),
    }
}

fn log_outcome<T>(op: Operation, result: ComicResult<T>) -> ComicResult<T> {
    match &result {
        Ok(_) => info!("{:?} finished", op),
        Err(e) => error!("{:?} failed: {}", op, e),
    }
    result
}
