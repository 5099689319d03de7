use indexmap::IndexMap;
use uuid::Uuid;

use crate::errors::MissingBinding;

pub mod workbench;

pub use workbench::Workbench;

/// Instruction appended after the composed prompt, as the original card
/// deck always did before submitting.
pub const DIRECT_ANSWER_SUFFIX: &str =
    "Please give the result directly, without any explanation.";

/// A draggable paragraph of text. Owns an output socket other cards and
/// templates wire into, and a chain plug for linking onward to another
/// text card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextCard {
    pub id: String,
    pub content: String,
}

impl TextCard {
    pub fn socket_port_id(&self) -> String {
        socket_port_id(&self.id)
    }

    pub fn chain_port_id(&self) -> String {
        chain_port_id(&self.id)
    }
}

pub fn socket_port_id(card_id: &str) -> String {
    format!("{card_id}_socket")
}

pub fn chain_port_id(card_id: &str) -> String {
    format!("{card_id}_chain")
}

/// Input plug ids are 1-based, matching the original `<card>_port_<n>`
/// convention.
pub fn plug_port_id(card_id: &str, index: usize) -> String {
    format!("{card_id}_port_{}", index + 1)
}

/// A prompt with `{{name}}` placeholders. Each placeholder occurrence, in
/// first-appearance order, gets its own input plug and binding slot;
/// duplicate names still get separate slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub id: String,
    pub title: String,
    pub prompt: String,
    placeholders: Vec<String>,
    bindings: Vec<Option<String>>,
}

impl PromptTemplate {
    pub fn new(id: impl Into<String>, title: impl Into<String>, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        let placeholders = scan_placeholders(&prompt);
        let bindings = vec![None; placeholders.len()];
        Self {
            id: id.into(),
            title: title.into(),
            prompt,
            placeholders,
            bindings,
        }
    }

    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    pub fn binding(&self, index: usize) -> Option<&str> {
        self.bindings.get(index).and_then(Option::as_deref)
    }

    pub fn plug_port_id(&self, index: usize) -> String {
        plug_port_id(&self.id, index)
    }

    /// Replaces the title and prompt text. If the recomputed placeholder
    /// sequence differs from the previous one, all bindings are dropped and
    /// the caller must rebuild the ports; returns whether that happened.
    pub fn set_content(&mut self, title: impl Into<String>, prompt: impl Into<String>) -> bool {
        self.title = title.into();
        self.prompt = prompt.into();
        let scanned = scan_placeholders(&self.prompt);
        if scanned == self.placeholders {
            return false;
        }
        self.placeholders = scanned;
        self.bindings = vec![None; self.placeholders.len()];
        true
    }

    pub fn bind(&mut self, index: usize, content: impl Into<String>) {
        if let Some(slot) = self.bindings.get_mut(index) {
            *slot = Some(content.into());
        }
    }

    pub fn unbind(&mut self, index: usize) {
        if let Some(slot) = self.bindings.get_mut(index) {
            *slot = None;
        }
    }

    /// Placeholder names with no binding, in original template order.
    pub fn unbound_placeholders(&self) -> Vec<String> {
        self.placeholders
            .iter()
            .zip(&self.bindings)
            .filter(|(_, binding)| binding.is_none())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Substitutes every placeholder occurrence with its bound content.
    /// For duplicate names the first slot's binding wins, matching the
    /// original global-replace behavior.
    pub fn render(&self) -> Result<String, MissingBinding> {
        let unbound = self.unbound_placeholders();
        if !unbound.is_empty() {
            return Err(MissingBinding {
                placeholders: unbound,
            });
        }

        let mut out = String::new();
        let mut cursor = 0;
        while let Some(found) = next_placeholder(&self.prompt[cursor..]) {
            out.push_str(&self.prompt[cursor..cursor + found.start]);
            let binding = self
                .placeholders
                .iter()
                .position(|name| *name == found.name)
                .and_then(|index| self.binding(index));
            match binding {
                Some(content) => out.push_str(content),
                // Unreachable once the unbound check passed.
                None => out.push_str(&self.prompt[cursor + found.start..cursor + found.end]),
            }
            cursor += found.end;
        }
        out.push_str(&self.prompt[cursor..]);
        Ok(out)
    }
}

struct PlaceholderMatch {
    start: usize,
    end: usize,
    name: String,
}

/// Finds the next `{{name}}` occurrence: double braces around one or more
/// non-`}` characters, name trimmed.
fn next_placeholder(text: &str) -> Option<PlaceholderMatch> {
    let mut cursor = 0;
    while let Some(open) = text[cursor..].find("{{") {
        let start = cursor + open;
        let inner_start = start + 2;
        let close = text[inner_start..].find('}')?;
        if close > 0 && text[inner_start + close..].starts_with("}}") {
            return Some(PlaceholderMatch {
                start,
                end: inner_start + close + 2,
                name: text[inner_start..inner_start + close].trim().to_string(),
            });
        }
        cursor = inner_start;
    }
    None
}

/// Placeholder names in first-appearance order, duplicates included.
pub fn scan_placeholders(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = 0;
    while let Some(found) = next_placeholder(&text[cursor..]) {
        names.push(found.name);
        cursor += found.end;
    }
    names
}

/// The deck of cards on the canvas, keyed by id in creation order.
#[derive(Debug, Default)]
pub struct CardStore {
    texts: IndexMap<String, TextCard>,
    templates: IndexMap<String, PromptTemplate>,
}

impl CardStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_text(&mut self, content: impl Into<String>) -> String {
        let id = fresh_card_id();
        self.texts.insert(
            id.clone(),
            TextCard {
                id: id.clone(),
                content: content.into(),
            },
        );
        id
    }

    pub fn insert_template(
        &mut self,
        title: impl Into<String>,
        prompt: impl Into<String>,
    ) -> String {
        let id = fresh_card_id();
        self.templates
            .insert(id.clone(), PromptTemplate::new(id.clone(), title, prompt));
        id
    }

    pub fn text(&self, id: &str) -> Option<&TextCard> {
        self.texts.get(id)
    }

    pub fn text_mut(&mut self, id: &str) -> Option<&mut TextCard> {
        self.texts.get_mut(id)
    }

    pub fn template(&self, id: &str) -> Option<&PromptTemplate> {
        self.templates.get(id)
    }

    pub fn template_mut(&mut self, id: &str) -> Option<&mut PromptTemplate> {
        self.templates.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.texts.shift_remove(id).is_some() || self.templates.shift_remove(id).is_some()
    }

    pub fn texts(&self) -> impl Iterator<Item = &TextCard> {
        self.texts.values()
    }

    pub fn templates(&self) -> impl Iterator<Item = &PromptTemplate> {
        self.templates.values()
    }
}

fn fresh_card_id() -> String {
    format!("card_{}", Uuid::new_v4())
}
