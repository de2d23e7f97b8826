//! Turns the engine's token stream into tune text.
//!
//! The first two tokens decide the meter and key header lines. A missing
//! header gets a placeholder line (`M:none`, `K:none`) and the token that
//! was in its place is held back until the body starts. After that every
//! token is body text, with header changes written inline (`[M:3/4]`).

use tunesmith_repertoire::{HeaderKind, HeaderRules};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    AwaitingMeter,
    AwaitingKey,
    InBody,
}

#[derive(Debug, Clone)]
pub struct Assembler {
    rules: HeaderRules,
    state: AssemblyState,
    position: usize,
    text: String,
    deferred: Vec<String>,
    body_started: bool,
}

impl Assembler {
    pub fn new(rules: HeaderRules) -> Self {
        Self {
            rules,
            state: AssemblyState::AwaitingMeter,
            position: 0,
            text: String::new(),
            deferred: Vec::new(),
            body_started: false,
        }
    }

    pub fn state(&self) -> AssemblyState {
        self.state
    }

    /// 1-indexed position of the last token pushed.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn has_deferred(&self) -> bool {
        !self.deferred.is_empty()
    }

    /// Feed the next token and get the complete text so far. Each result is a
    /// prefix of the next. Empty tokens are ignored.
    pub fn push(&mut self, token: &str) -> &str {
        if token.is_empty() {
            return &self.text;
        }
        self.position += 1;

        match self.state {
            AssemblyState::AwaitingMeter => {
                self.header_or_placeholder(HeaderKind::Meter, token);
                self.state = AssemblyState::AwaitingKey;
            }
            AssemblyState::AwaitingKey => {
                self.header_or_placeholder(HeaderKind::Key, token);
                self.state = AssemblyState::InBody;
            }
            AssemblyState::InBody => {
                self.flush_deferred();
                self.append_body(token);
            }
        }
        &self.text
    }

    /// Called when the stream ends. Header lines the stream never reached
    /// get their placeholders, then tokens still held back are written as
    /// body text so none are lost.
    pub fn finish(&mut self) -> &str {
        if self.state == AssemblyState::AwaitingMeter {
            let placeholder = self.rules.no_meter.clone();
            self.push_line(&placeholder);
            self.state = AssemblyState::AwaitingKey;
        }
        if self.state == AssemblyState::AwaitingKey {
            let placeholder = self.rules.no_key.clone();
            self.push_line(&placeholder);
            self.state = AssemblyState::InBody;
        }
        self.flush_deferred();
        &self.text
    }

    fn header_or_placeholder(&mut self, kind: HeaderKind, token: &str) {
        if self.rules.carries(kind, token) {
            let bare = self.rules.strip_inline(token).to_string();
            self.push_line(&bare);
        } else {
            let placeholder = match kind {
                HeaderKind::Meter => self.rules.no_meter.clone(),
                _ => self.rules.no_key.clone(),
            };
            self.push_line(&placeholder);
            self.deferred.push(token.to_string());
        }
    }

    fn push_line(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');
    }

    fn flush_deferred(&mut self) {
        for token in std::mem::take(&mut self.deferred) {
            self.append_body(&token);
        }
    }

    fn append_body(&mut self, token: &str) {
        if self.body_started {
            self.text.push(' ');
        }
        self.body_started = true;
        if self.rules.header_kind(token).is_some() && !self.rules.is_inline(token) {
            let inline = self.rules.inline(token);
            self.text.push_str(&inline);
        } else {
            self.text.push_str(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(tokens: &[&str]) -> Vec<String> {
        let mut assembler = Assembler::new(HeaderRules::default());
        tokens
            .iter()
            .map(|t| assembler.push(t).to_string())
            .collect()
    }

    #[test]
    fn missing_meter_gets_placeholder_and_token_is_kept() {
        let outputs = assemble(&["a", "K:Cmaj", "b"]);
        assert_eq!(outputs[0], "M:none\n");
        assert_eq!(outputs[1], "M:none\nK:Cmaj\n");
        assert_eq!(outputs[2], "M:none\nK:Cmaj\na b");
    }

    #[test]
    fn headers_in_place_become_lines() {
        let outputs = assemble(&["M:6/8", "K:Cdor", "|:", "A", "B"]);
        assert_eq!(outputs.last().unwrap(), "M:6/8\nK:Cdor\n|: A B");
    }

    #[test]
    fn both_headers_missing() {
        let outputs = assemble(&["a", "b", "c"]);
        assert_eq!(outputs[1], "M:none\nK:none\n");
        assert_eq!(outputs[2], "M:none\nK:none\na b c");
    }

    #[test]
    fn inline_spelling_at_the_head_is_unwrapped() {
        let outputs = assemble(&["[M:3/4]", "[K:Cmaj]", "[L:1/8]", "a"]);
        assert_eq!(outputs.last().unwrap(), "M:3/4\nK:Cmaj\n[L:1/8] a");
    }

    #[test]
    fn header_tokens_in_the_body_are_inlined() {
        let outputs = assemble(&["M:4/4", "K:Cmaj", "a", "M:3/4", "b", "K:Cmin", "L:1/16"]);
        assert_eq!(
            outputs.last().unwrap(),
            "M:4/4\nK:Cmaj\na [M:3/4] b [K:Cmin] [L:1/16]"
        );
    }

    #[test]
    fn deferred_headers_are_inlined_too() {
        let outputs = assemble(&["K:Cmaj", "M:4/4", "a"]);
        assert_eq!(outputs.last().unwrap(), "M:none\nK:none\n[K:Cmaj] [M:4/4] a");
    }

    #[test]
    fn every_output_extends_the_previous() {
        let outputs = assemble(&["x", "y", "z", "M:2/4", "|", "a", "b"]);
        for pair in outputs.windows(2) {
            assert!(pair[1].starts_with(&pair[0]), "{:?}", pair);
        }
    }

    #[test]
    fn header_lines_are_always_present() {
        for tokens in [
            vec![],
            vec!["a"],
            vec!["M:4/4"],
            vec!["a", "b"],
            vec!["M:4/4", "a", "b"],
            vec!["a", "K:Cmaj", "b", "c"],
        ] {
            let mut assembler = Assembler::new(HeaderRules::default());
            for token in &tokens {
                assembler.push(token);
            }
            let text = assembler.finish().to_string();
            let mut lines = text.lines();
            assert!(lines.next().unwrap().starts_with("M:"), "{:?}: {:?}", tokens, text);
            assert!(lines.next().unwrap().starts_with("K:"), "{:?}: {:?}", tokens, text);
            assert_eq!(assembler.state(), AssemblyState::InBody);
        }
    }

    #[test]
    fn short_streams_finish_with_placeholders() {
        let mut assembler = Assembler::new(HeaderRules::default());
        assert_eq!(assembler.finish(), "M:none\nK:none\n");

        let mut assembler = Assembler::new(HeaderRules::default());
        assembler.push("a");
        assert_eq!(assembler.finish(), "M:none\nK:none\na");

        let mut assembler = Assembler::new(HeaderRules::default());
        assembler.push("M:6/8");
        assert_eq!(assembler.finish(), "M:6/8\nK:none\n");
    }

    #[test]
    fn finish_flushes_tokens_held_back() {
        let mut assembler = Assembler::new(HeaderRules::default());
        assembler.push("a");
        assembler.push("b");
        assert!(assembler.has_deferred());
        assert_eq!(assembler.finish(), "M:none\nK:none\na b");
        assert!(!assembler.has_deferred());
        assert_eq!(assembler.finish(), "M:none\nK:none\na b");
    }

    #[test]
    fn position_counts_every_token() {
        let mut assembler = Assembler::new(HeaderRules::default());
        for t in ["M:4/4", "K:Cmaj", "a", "", "b"] {
            assembler.push(t);
        }
        assert_eq!(assembler.position(), 4);
        assert_eq!(assembler.state(), AssemblyState::InBody);
    }
}
