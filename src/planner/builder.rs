//! Step-wise construction of a directive sequence
//!
//! Each step takes the builder by value and returns a new one, so a partial
//! plan can never be observed half-mutated.

use crate::protocol::{Directive, DirectiveSequence};

#[derive(Debug, Clone, Default)]
pub struct DirectiveBuilder {
    directives: Vec<Directive>,
}

impl DirectiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one directive
    pub fn push(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    /// Append a directive when present
    pub fn push_opt(self, directive: Option<Directive>) -> Self {
        match directive {
            Some(directive) => self.push(directive),
            None => self,
        }
    }

    pub fn extend(self, directives: impl IntoIterator<Item = Directive>) -> Self {
        directives.into_iter().fold(self, Self::push)
    }

    /// Apply a step only when the condition holds
    pub fn when(self, condition: bool, step: impl FnOnce(Self) -> Self) -> Self {
        if condition {
            step(self)
        } else {
            self
        }
    }

    pub fn build(self) -> DirectiveSequence {
        DirectiveSequence::new(self.directives)
    }
}
