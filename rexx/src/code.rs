use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    ErrorCode, ExecCx, ExecResult, Expr, RexxError,
    instructions::{Assign, Do, End, Jump, JumpUnless, Label, LoopSpec, Say},
};

/// A node of the instruction graph.
///
/// Nodes are immutable and shared by every activation running the code;
/// all mutable state lives in the activation reached through `cx`.
pub trait Instruction: Send + Sync + fmt::Debug {
    fn execute(&self, cx: &mut ExecCx<'_>) -> ExecResult;

    /// Keyword shown in traces and tracebacks.
    fn keyword(&self) -> &'static str;

    /// Label name, for label clauses.
    fn label(&self) -> Option<&str> {
        None
    }
}

/// A forward reference to a clause, resolved when the code is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Anchor(usize);

#[derive(Debug)]
pub struct Clause {
    instruction: Box<dyn Instruction>,
    line: usize,
}

impl Clause {
    #[inline]
    pub fn instruction(&self) -> &dyn Instruction {
        self.instruction.as_ref()
    }

    #[inline]
    pub fn line(&self) -> usize {
        self.line
    }

    #[inline]
    pub fn is_label(&self) -> bool {
        self.instruction.label().is_some()
    }
}

/// An immutable, translated program unit.
#[derive(Debug)]
pub struct Code {
    name: String,
    clauses: Vec<Clause>,
    labels: HashMap<String, usize>,
    anchors: Vec<usize>,
}

impl Code {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    #[inline]
    pub fn clause(&self, index: usize) -> Option<&Clause> {
        self.clauses.get(index)
    }

    /// Clause index of a label. The first definition wins.
    pub fn label(&self, name: &str) -> Option<usize> {
        self.labels.get(&name.to_ascii_uppercase()).copied()
    }

    #[inline]
    pub fn resolve(&self, anchor: Anchor) -> usize {
        self.anchors[anchor.0]
    }

    pub fn line_of(&self, index: usize) -> usize {
        self.clauses.get(index).map_or(0, Clause::line)
    }
}

/// Assembles [`Code`].
///
/// Each pushed clause gets the next line number unless [`CodeBuilder::at`]
/// says otherwise.
#[derive(Debug)]
pub struct CodeBuilder {
    name: String,
    clauses: Vec<Clause>,
    labels: HashMap<String, usize>,
    anchors: Vec<Option<usize>>,
    next_line: usize,
}

impl CodeBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            clauses: Vec::new(),
            labels: HashMap::new(),
            anchors: Vec::new(),
            next_line: 1,
        }
    }

    pub fn at(&mut self, line: usize) -> &mut Self {
        self.next_line = line;
        self
    }

    pub fn push(&mut self, instruction: impl Instruction + 'static) -> &mut Self {
        self.clauses.push(Clause {
            instruction: Box::new(instruction),
            line: self.next_line,
        });
        self.next_line += 1;
        self
    }

    pub fn label(&mut self, name: &str) -> &mut Self {
        let name = name.to_ascii_uppercase();
        self.labels.entry(name.clone()).or_insert(self.clauses.len());
        self.push(Label::new(&name))
    }

    pub fn say(&mut self, expr: Expr) -> &mut Self {
        self.push(Say::new(expr))
    }

    pub fn assign(&mut self, name: &str, expr: Expr) -> &mut Self {
        self.push(Assign::new(name, expr))
    }

    pub fn anchor(&mut self) -> Anchor {
        self.anchors.push(None);
        Anchor(self.anchors.len() - 1)
    }

    /// Points `anchor` at the next clause pushed.
    pub fn bind(&mut self, anchor: Anchor) -> &mut Self {
        self.anchors[anchor.0] = Some(self.clauses.len());
        self
    }

    /// IF `condition` THEN `body`.
    pub fn if_then(&mut self, condition: Expr, body: impl FnOnce(&mut Self)) -> &mut Self {
        let skip = self.anchor();
        self.push(JumpUnless::new(condition, skip));
        body(self);
        self.bind(skip)
    }

    /// IF `condition` THEN `then` ELSE `otherwise`.
    pub fn if_else(
        &mut self,
        condition: Expr,
        then: impl FnOnce(&mut Self),
        otherwise: impl FnOnce(&mut Self),
    ) -> &mut Self {
        let other = self.anchor();
        let done = self.anchor();
        self.push(JumpUnless::new(condition, other));
        then(self);
        self.push(Jump::new(done));
        self.bind(other);
        otherwise(self);
        self.bind(done)
    }

    /// DO ... END around `body`.
    pub fn do_block(&mut self, spec: LoopSpec, body: impl FnOnce(&mut Self)) -> &mut Self {
        let start = self.anchor();
        let end = self.anchor();
        self.bind(start);
        self.push(Do::new(spec, end));
        body(self);
        self.bind(end);
        self.push(End::new(start))
    }

    pub fn build(self) -> Result<Code, RexxError> {
        let mut anchors = Vec::with_capacity(self.anchors.len());
        for (id, anchor) in self.anchors.into_iter().enumerate() {
            match anchor {
                Some(index) => anchors.push(index),
                None => {
                    return Err(RexxError::new(
                        ErrorCode::Translation,
                        format!("anchor {id} in {} was never bound", self.name),
                    ));
                }
            }
        }
        Ok(Code {
            name: self.name,
            clauses: self.clauses,
            labels: self.labels,
            anchors,
        })
    }

    pub fn build_shared(self) -> Result<Arc<Code>, RexxError> {
        self.build().map(Arc::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::Nop;

    #[test]
    fn labels_and_lines() {
        let mut b = CodeBuilder::new("main");
        b.push(Nop).at(10).label("here").push(Nop).label("HERE");
        let code = b.build().unwrap();
        assert_eq!(code.name(), "MAIN");
        assert_eq!(code.len(), 4);
        assert_eq!(code.label("Here"), Some(1));
        assert_eq!(code.line_of(0), 1);
        assert_eq!(code.line_of(1), 10);
        assert_eq!(code.line_of(2), 11);
        assert!(code.clause(1).unwrap().is_label());
        assert!(code.label("nowhere").is_none());
    }

    #[test]
    fn unbound_anchor_is_a_translation_error() {
        let mut b = CodeBuilder::new("broken");
        let a = b.anchor();
        b.push(Jump::new(a));
        let err = b.build().unwrap_err();
        assert_eq!(err.code, ErrorCode::Translation);
    }

    #[test]
    fn if_else_resolves_anchors() {
        let mut b = CodeBuilder::new("cond");
        b.if_else(Expr::lit("1"), |b| {
            b.push(Nop);
        }, |b| {
            b.push(Nop);
        });
        let code = b.build().unwrap();
        // jump-unless, nop, jump, nop
        assert_eq!(code.len(), 4);
        assert_eq!(code.resolve(Anchor(0)), 3);
        assert_eq!(code.resolve(Anchor(1)), 4);
    }
}
