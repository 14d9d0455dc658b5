use crate::core::error::{ComicError, ComicResult};
use crate::core::state::Dialogue;
use image::RgbaImage;
use log::debug;
use std::path::Path;
use std::sync::Arc;

/// Height of the dialogue band painted under every panel image.
pub const TEXT_BAND_HEIGHT: u32 = 250;
/// Distance from the bottom of the image to the first baseline.
pub const FIRST_BASELINE: u32 = 40;
pub const LINE_PITCH: u32 = 35;
pub const FONT_SIZE: u32 = 24;
pub const TEXT_COLOR: &str = "#333333";

const FONT_FAMILY: &str = "'Noto Sans CJK KR', 'Noto Sans KR', 'Malgun Gothic', 'Apple SD Gothic Neo', sans-serif";

/// Rasterises dialogue lines into white bands. The font database is built once and shared.
#[derive(Clone)]
pub struct CaptionRenderer {
    fontdb: Arc<usvg::fontdb::Database>,
}

impl CaptionRenderer {
    pub fn new(fonts_dir: Option<&Path>) -> Self {
        let mut db = usvg::fontdb::Database::new();
        db.load_system_fonts();
        if let Some(dir) = fonts_dir {
            load_fonts_from_dir(&mut db, dir);
        }
        debug!("Caption font database holds {} faces", db.len());
        Self {
            fontdb: Arc::new(db),
        }
    }

    /// Renders a `width` x [`TEXT_BAND_HEIGHT`] band with one centred line per dialogue.
    pub fn render_band(&self, width: u32, dialogues: &[Dialogue]) -> ComicResult<RgbaImage> {
        let svg = band_svg(width, dialogues);
        let opts = usvg::Options {
            fontdb: self.fontdb.clone(),
            font_resolver: make_font_resolver(),
            ..Default::default()
        };
        let tree = usvg::Tree::from_str(&svg, &opts)
            .map_err(|e| ComicError::composition(format!("caption svg parse failed: {}", e)))?;

        let mut pixmap = resvg::tiny_skia::Pixmap::new(width, TEXT_BAND_HEIGHT)
            .ok_or_else(|| ComicError::composition("caption band has zero size"))?;
        resvg::render(
            &tree,
            resvg::tiny_skia::Transform::identity(),
            &mut pixmap.as_mut(),
        );

        // The band is opaque, so premultiplied and straight alpha coincide.
        RgbaImage::from_raw(width, TEXT_BAND_HEIGHT, pixmap.take())
            .ok_or_else(|| ComicError::composition("caption buffer size mismatch"))
    }
}

pub fn caption_line(dialogue: &Dialogue) -> String {
    format!("{}: {}", dialogue.speaker, dialogue.text)
}

fn band_svg(width: u32, dialogues: &[Dialogue]) -> String {
    let mut svg = format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}"><rect x="0" y="0" width="{w}" height="{h}" fill="#ffffff"/>"##,
        w = width,
        h = TEXT_BAND_HEIGHT
    );
    let center = width as f32 / 2.0;
    for (i, dialogue) in dialogues.iter().enumerate() {
        let y = FIRST_BASELINE + i as u32 * LINE_PITCH;
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="middle" font-family="{}" font-size="{}" fill="{}">{}</text>"#,
            center,
            y,
            FONT_FAMILY,
            FONT_SIZE,
            TEXT_COLOR,
            escape_xml(&caption_line(dialogue))
        ));
    }
    svg.push_str("</svg>");
    svg
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Resolves the requested families, then the generic ones, then any loaded face, so captions
/// render even when none of the preferred fonts is installed. Glyphs missing from the chosen
/// face go through the default fallback selector.
fn make_font_resolver() -> usvg::FontResolver<'static> {
    usvg::FontResolver {
        select_font: Box::new(|font, fontdb| {
            let mut families = Vec::<usvg::fontdb::Family<'_>>::new();
            for family in font.families() {
                families.push(match family {
                    usvg::FontFamily::Serif => usvg::fontdb::Family::Serif,
                    usvg::FontFamily::SansSerif => usvg::fontdb::Family::SansSerif,
                    usvg::FontFamily::Cursive => usvg::fontdb::Family::Cursive,
                    usvg::FontFamily::Fantasy => usvg::fontdb::Family::Fantasy,
                    usvg::FontFamily::Monospace => usvg::fontdb::Family::Monospace,
                    usvg::FontFamily::Named(s) => usvg::fontdb::Family::Name(s),
                });
            }
            families.push(usvg::fontdb::Family::SansSerif);
            families.push(usvg::fontdb::Family::Serif);

            let query = usvg::fontdb::Query {
                families: &families,
                weight: usvg::fontdb::Weight(font.weight()),
                stretch: usvg::fontdb::Stretch::Normal,
                style: usvg::fontdb::Style::Normal,
            };
            fontdb
                .query(&query)
                .or_else(|| fontdb.faces().next().map(|f| f.id))
        }),
        select_fallback: usvg::FontResolver::default_fallback_selector(),
    }
}

fn load_fonts_from_dir(db: &mut usvg::fontdb::Database, dir: &Path) {
    let Ok(rd) = std::fs::read_dir(dir) else {
        debug!("Font directory {} not readable, skipping", dir.display());
        return;
    };

    for entry in rd.flatten() {
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|s| s.to_str()) else {
            continue;
        };
        if matches!(ext.to_ascii_lowercase().as_str(), "ttf" | "otf" | "ttc") {
            if let Err(e) = db.load_font_file(&path) {
                debug!("Skipping font {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(speaker: &str, text: &str) -> Dialogue {
        Dialogue {
            speaker: speaker.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_band_svg_escapes_and_steps_baselines() {
        let svg = band_svg(
            100,
            &[line("민수", "<비가 와요> & 우산"), line("지은", "\"같이 써요\"")],
        );
        assert!(svg.contains("민수: &lt;비가 와요&gt; &amp; 우산"));
        assert!(svg.contains("&quot;같이 써요&quot;"));
        assert!(svg.contains(r#"x="50" y="40""#));
        assert!(svg.contains(r#"x="50" y="75""#));
        assert!(svg.contains(r##"fill="#333333""##));
    }

    #[test]
    fn test_render_band_is_white_and_sized() {
        let renderer = CaptionRenderer::new(None);
        let band = renderer.render_band(120, &[]).unwrap();
        assert_eq!(band.dimensions(), (120, TEXT_BAND_HEIGHT));
        assert_eq!(band.get_pixel(0, 0), &image::Rgba([255, 255, 255, 255]));
        assert_eq!(band.get_pixel(119, 249), &image::Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_dialogue_band_has_ink() {
        let renderer = CaptionRenderer::new(None);
        if renderer.fontdb.len() == 0 {
            // No fonts on this machine; nothing can be drawn.
            return;
        }
        let band = renderer
            .render_band(400, &[line("Min", "Hello there"), line("민수", "안녕하세요")])
            .unwrap();
        let inked = band
            .pixels()
            .filter(|p| p.0 != [255, 255, 255, 255])
            .count();
        assert!(inked > 0, "dialogue text was not drawn");
    }

    #[test]
    fn test_zero_width_band_is_composition_error() {
        let renderer = CaptionRenderer::new(None);
        let err = renderer.render_band(0, &[]).unwrap_err();
        assert!(matches!(err, ComicError::Composition(_)));
    }
}
