use crate::cards::{self, CardStore, DIRECT_ANSWER_SUFFIX};
use crate::errors::WorkbenchError;
use crate::graph::{ConnectionGraph, Edge, EdgeKind, Port, PortKind};

/// One canvas worth of cards and wiring. Holds the card store and the
/// connection graph explicitly instead of reaching through ambient
/// globals, and keeps template bindings in step with graph edits.
#[derive(Debug)]
pub struct Workbench {
    store: CardStore,
    graph: ConnectionGraph,
    direct_answer_suffix: String,
}

impl Default for Workbench {
    fn default() -> Self {
        Self {
            store: CardStore::default(),
            graph: ConnectionGraph::default(),
            direct_answer_suffix: DIRECT_ANSWER_SUFFIX.to_string(),
        }
    }
}

impl Workbench {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the instruction appended after every composed prompt.
    /// An empty suffix disables it.
    pub fn set_direct_answer_suffix(&mut self, suffix: impl Into<String>) {
        self.direct_answer_suffix = suffix.into();
    }

    pub fn direct_answer_suffix(&self) -> &str {
        &self.direct_answer_suffix
    }

    pub fn store(&self) -> &CardStore {
        &self.store
    }

    pub fn graph(&self) -> &ConnectionGraph {
        &self.graph
    }

    /// Adds a paragraph card and registers its socket and chain ports.
    pub fn add_text_card(&mut self, content: impl Into<String>) -> String {
        let id = self.store.insert_text(content);
        self.graph.add_port(Port {
            id: cards::socket_port_id(&id),
            kind: PortKind::OutputSocket,
            owner: id.clone(),
            slot: None,
        });
        self.graph.add_port(Port {
            id: cards::chain_port_id(&id),
            kind: PortKind::ChainPlug,
            owner: id.clone(),
            slot: None,
        });
        id
    }

    /// Adds a prompt template card and registers one input plug per
    /// placeholder occurrence.
    pub fn add_template(
        &mut self,
        title: impl Into<String>,
        prompt: impl Into<String>,
    ) -> String {
        let id = self.store.insert_template(title, prompt);
        self.register_template_ports(&id);
        id
    }

    /// Replaces a text card's content. Existing prompt bindings keep the
    /// text they captured when the edge was made, as in the original.
    pub fn edit_text_card(
        &mut self,
        card_id: &str,
        content: impl Into<String>,
    ) -> Result<(), WorkbenchError> {
        let card = self
            .store
            .text_mut(card_id)
            .ok_or_else(|| WorkbenchError::UnknownCard(card_id.to_string()))?;
        card.content = content.into();
        Ok(())
    }

    /// Re-edits a template. When the placeholder sequence changed, every
    /// old plug is disconnected and dropped and fresh ports are built; no
    /// binding survives the change.
    pub fn edit_template(
        &mut self,
        card_id: &str,
        title: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Result<(), WorkbenchError> {
        let changed = self
            .store
            .template_mut(card_id)
            .ok_or_else(|| WorkbenchError::UnknownCard(card_id.to_string()))?
            .set_content(title, prompt);
        if !changed {
            return Ok(());
        }
        self.graph.remove_card_ports(card_id);
        self.register_template_ports(card_id);
        Ok(())
    }

    /// Wires two ports together. Completing a prompt edge resolves the
    /// socket owner's chain text and stores it at the plug's placeholder
    /// slot; edges the source displaced get their bindings cleared first.
    pub fn connect(&mut self, source: &str, target: &str) -> Result<Edge, WorkbenchError> {
        let outcome = self.graph.connect(source, target)?;
        for edge in &outcome.displaced {
            self.clear_edge_binding(edge);
        }
        if outcome.edge.kind == EdgeKind::Prompt {
            self.apply_edge_binding(&outcome.edge);
        }
        Ok(outcome.edge)
    }

    /// Detaches every edge touching a port. A no-op when nothing is wired.
    pub fn disconnect(&mut self, port_id: &str) {
        let removed = self.graph.disconnect(port_id);
        for edge in &removed {
            self.clear_edge_binding(edge);
        }
    }

    /// Destroys a card: detaches all edges touching its ports, clears the
    /// bindings those edges fed, and removes the card itself.
    pub fn remove_card(&mut self, card_id: &str) -> Result<(), WorkbenchError> {
        if self.store.text(card_id).is_none() && self.store.template(card_id).is_none() {
            return Err(WorkbenchError::UnknownCard(card_id.to_string()));
        }
        let removed = self.graph.remove_card_ports(card_id);
        for edge in &removed {
            self.clear_edge_binding(edge);
        }
        self.store.remove(card_id);
        Ok(())
    }

    /// Concatenates a text card's content with every card chained after
    /// it, separated by blank lines. Starting card first.
    pub fn resolve_chain_text(&self, card_id: &str) -> String {
        let contents: Vec<&str> = self
            .graph
            .chain_from(card_id)
            .into_iter()
            .filter_map(|id| self.store.text(&id).map(|card| card.content.as_str()))
            .collect();
        contents.join("\n\n")
    }

    /// The composed prompt for a template, with the direct-answer suffix
    /// appended. Fails with `MissingBinding` while any placeholder is
    /// unwired.
    pub fn render_prompt(&self, template_id: &str) -> Result<String, WorkbenchError> {
        let template = self
            .store
            .template(template_id)
            .ok_or_else(|| WorkbenchError::UnknownCard(template_id.to_string()))?;
        let mut rendered = template.render()?;
        if !self.direct_answer_suffix.is_empty() {
            rendered.push_str("\n\n");
            rendered.push_str(&self.direct_answer_suffix);
        }
        Ok(rendered)
    }

    fn register_template_ports(&mut self, template_id: &str) {
        let port_ids: Vec<(String, usize)> = self
            .store
            .template(template_id)
            .map(|template| {
                (0..template.placeholders().len())
                    .map(|index| (template.plug_port_id(index), index))
                    .collect()
            })
            .unwrap_or_default();
        for (port_id, index) in port_ids {
            self.graph.add_port(Port {
                id: port_id,
                kind: PortKind::InputPlug,
                owner: template_id.to_string(),
                slot: Some(index),
            });
        }
    }

    fn apply_edge_binding(&mut self, edge: &Edge) {
        let Some(plug) = self.graph.port(&edge.source).cloned() else {
            return;
        };
        let Some(socket) = self.graph.port(&edge.target).cloned() else {
            return;
        };
        let Some(slot) = plug.slot else { return };
        let content = self.resolve_chain_text(&socket.owner);
        if let Some(template) = self.store.template_mut(&plug.owner) {
            template.bind(slot, content);
        }
    }

    fn clear_edge_binding(&mut self, edge: &Edge) {
        if edge.kind != EdgeKind::Prompt {
            return;
        }
        let Some(plug) = self.graph.port(&edge.source).cloned() else {
            return;
        };
        let Some(slot) = plug.slot else { return };
        if let Some(template) = self.store.template_mut(&plug.owner) {
            template.unbind(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{GraphError, MissingBinding, WorkbenchError};
    use crate::graph::EdgeKind;

    use super::*;

    fn plug(bench: &Workbench, template_id: &str, index: usize) -> String {
        bench
            .store()
            .template(template_id)
            .expect("template exists")
            .plug_port_id(index)
    }

    fn socket(bench: &Workbench, card_id: &str) -> String {
        bench
            .store()
            .text(card_id)
            .expect("text card exists")
            .socket_port_id()
    }

    fn chain(bench: &Workbench, card_id: &str) -> String {
        bench
            .store()
            .text(card_id)
            .expect("text card exists")
            .chain_port_id()
    }

    #[test]
    fn connecting_a_prompt_edge_binds_the_placeholder() {
        let mut bench = Workbench::new();
        let text = bench.add_text_card("First paragraph.");
        let template = bench.add_template("Polish", "Polish this: {{draft}}");

        bench
            .connect(&plug(&bench, &template, 0), &socket(&bench, &text))
            .expect("wire draft");
        assert_eq!(
            bench.store().template(&template).and_then(|t| t.binding(0)),
            Some("First paragraph.")
        );
    }

    #[test]
    fn chained_cards_bind_their_combined_text() {
        let mut bench = Workbench::new();
        let t1 = bench.add_text_card("one");
        let t2 = bench.add_text_card("two");
        let t3 = bench.add_text_card("three");
        bench
            .connect(&chain(&bench, &t1), &socket(&bench, &t2))
            .expect("t1 -> t2");
        bench
            .connect(&chain(&bench, &t2), &socket(&bench, &t3))
            .expect("t2 -> t3");

        assert_eq!(bench.resolve_chain_text(&t1), "one\n\ntwo\n\nthree");
        assert_eq!(bench.resolve_chain_text(&t2), "two\n\nthree");

        let template = bench.add_template("Merge", "{{body}}");
        bench
            .connect(&plug(&bench, &template, 0), &socket(&bench, &t1))
            .expect("wire body");
        assert_eq!(
            bench.store().template(&template).and_then(|t| t.binding(0)),
            Some("one\n\ntwo\n\nthree")
        );
    }

    #[test]
    fn disconnect_clears_the_binding_it_fed() {
        let mut bench = Workbench::new();
        let text = bench.add_text_card("body");
        let template = bench.add_template("Polish", "{{draft}}");
        let plug_id = plug(&bench, &template, 0);

        bench
            .connect(&plug_id, &socket(&bench, &text))
            .expect("wire");
        bench.disconnect(&plug_id);
        assert_eq!(
            bench.store().template(&template).and_then(|t| t.binding(0)),
            None
        );
        // Idempotent.
        bench.disconnect(&plug_id);
    }

    #[test]
    fn rewiring_a_plug_rebinds_to_the_new_source() {
        let mut bench = Workbench::new();
        let a = bench.add_text_card("from a");
        let b = bench.add_text_card("from b");
        let template = bench.add_template("Polish", "{{draft}}");
        let plug_id = plug(&bench, &template, 0);

        bench.connect(&plug_id, &socket(&bench, &a)).expect("first");
        bench
            .connect(&plug_id, &socket(&bench, &b))
            .expect("rewire");
        assert_eq!(
            bench.store().template(&template).and_then(|t| t.binding(0)),
            Some("from b")
        );
        assert_eq!(bench.graph().edge_count(), 1);
    }

    #[test]
    fn removing_a_text_card_unbinds_its_consumers() {
        let mut bench = Workbench::new();
        let text = bench.add_text_card("body");
        let template = bench.add_template("Polish", "{{draft}}");
        bench
            .connect(&plug(&bench, &template, 0), &socket(&bench, &text))
            .expect("wire");

        bench.remove_card(&text).expect("remove");
        assert_eq!(
            bench.store().template(&template).and_then(|t| t.binding(0)),
            None
        );
        assert!(bench.store().text(&text).is_none());
        assert_eq!(bench.graph().edge_count(), 0);
    }

    #[test]
    fn chain_cycle_is_rejected_through_the_workbench() {
        let mut bench = Workbench::new();
        let t1 = bench.add_text_card("one");
        let t2 = bench.add_text_card("two");
        bench
            .connect(&chain(&bench, &t1), &socket(&bench, &t2))
            .expect("t1 -> t2");

        let err = bench
            .connect(&chain(&bench, &t2), &socket(&bench, &t1))
            .unwrap_err();
        assert!(matches!(
            err,
            WorkbenchError::Graph(GraphError::CycleDetected { .. })
        ));
    }

    #[test]
    fn render_prompt_fails_while_placeholders_are_unwired() {
        let mut bench = Workbench::new();
        let text = bench.add_text_card("body");
        let template = bench.add_template("Edit", "{{style}} rewrite of {{draft}} for {{reader}}");
        bench
            .connect(&plug(&bench, &template, 1), &socket(&bench, &text))
            .expect("wire draft");

        let err = bench.render_prompt(&template).unwrap_err();
        assert_eq!(
            err,
            WorkbenchError::MissingBinding(MissingBinding {
                placeholders: vec!["style".to_string(), "reader".to_string()],
            })
        );
    }

    #[test]
    fn render_prompt_appends_the_direct_answer_suffix() {
        let mut bench = Workbench::new();
        let text = bench.add_text_card("the body");
        let template = bench.add_template("Polish", "Polish: {{draft}}");
        bench
            .connect(&plug(&bench, &template, 0), &socket(&bench, &text))
            .expect("wire");

        let rendered = bench.render_prompt(&template).expect("all wired");
        assert_eq!(
            rendered,
            format!("Polish: the body\n\n{DIRECT_ANSWER_SUFFIX}")
        );
    }

    #[test]
    fn the_direct_answer_suffix_is_configurable() {
        let mut bench = Workbench::new();
        let text = bench.add_text_card("the body");
        let template = bench.add_template("Polish", "Polish: {{draft}}");
        bench
            .connect(&plug(&bench, &template, 0), &socket(&bench, &text))
            .expect("wire");

        bench.set_direct_answer_suffix("Reply in one sentence.");
        assert_eq!(
            bench.render_prompt(&template).expect("all wired"),
            "Polish: the body\n\nReply in one sentence."
        );

        // An empty suffix drops the trailer entirely.
        bench.set_direct_answer_suffix("");
        assert_eq!(
            bench.render_prompt(&template).expect("all wired"),
            "Polish: the body"
        );
    }

    #[test]
    fn editing_a_template_rebuilds_ports_only_when_placeholders_change() {
        let mut bench = Workbench::new();
        let text = bench.add_text_card("body");
        let template = bench.add_template("Polish", "Polish {{draft}} please");
        let plug_id = plug(&bench, &template, 0);
        bench
            .connect(&plug_id, &socket(&bench, &text))
            .expect("wire");

        // Same placeholder sequence: binding and edge survive.
        bench
            .edit_template(&template, "Polish", "Rewrite {{draft}} fully")
            .expect("edit");
        assert_eq!(
            bench.store().template(&template).and_then(|t| t.binding(0)),
            Some("body")
        );
        assert!(bench.graph().is_occupied(&plug_id, EdgeKind::Prompt));

        // Changed sequence: everything is torn down and rebuilt.
        bench
            .edit_template(&template, "Polish", "Rewrite {{draft}} as {{style}}")
            .expect("edit");
        assert_eq!(
            bench.store().template(&template).and_then(|t| t.binding(0)),
            None
        );
        assert!(!bench.graph().is_occupied(&plug_id, EdgeKind::Prompt));
        assert!(bench.graph().port(&plug_id).is_some());
        assert!(bench
            .graph()
            .port(&format!("{template}_port_2"))
            .is_some());
        assert_eq!(bench.graph().edge_count(), 0);
    }
}
