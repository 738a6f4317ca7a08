//! Network construction.

use std::collections::HashMap;
use std::sync::Arc;

use ruleweave_foundation::{Error, Result, Type};
use ruleweave_model::{
    AggregateElement, Declaration, ElementSource, PatternElement, RuleDefinition, RuleElement,
};
use tracing::debug;

use super::{AggregateSpec, DUMMY, Network, Node, NodeId, NodeKind, Quantifier, ROOT};
use crate::aggregation::{
    AggregateExpression, AggregateExpressions, Aggregator, AggregatorRegistry,
};
use crate::binder::{LhsExpression, compile_action, compile_lhs, compile_tuple};
use crate::index_map::IndexMap;
use crate::rule::{CompiledRule, RuleId};

/// Where the next element of a rule attaches.
#[derive(Clone, Debug)]
struct BuildContext {
    /// Beta node whose tuples the next element extends.
    left: NodeId,
    /// Declaration bound at each tuple position so far.
    positions: Vec<Option<Declaration>>,
}

/// The right input of an element that ranges over a source.
struct Source {
    right: NodeId,
    conditions: Vec<LhsExpression>,
    /// Positions preceding the source's visible fact.
    context: Vec<Option<Declaration>>,
    /// Declaration of the source's visible fact.
    element: Declaration,
}

/// Builds a [`Network`] rule by rule.
///
/// Type filters are shared between rules; everything below them belongs to
/// one rule. A rule that fails to compile leaves the builder unchanged.
#[derive(Debug)]
pub struct NetworkBuilder {
    nodes: Vec<Node>,
    rules: Vec<Arc<CompiledRule>>,
    type_filters: HashMap<Type, NodeId>,
    aggregators: AggregatorRegistry,
}

impl Default for NetworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkBuilder {
    /// Creates a builder with the built-in aggregators.
    #[must_use]
    pub fn new() -> Self {
        let nodes = vec![
            Node {
                kind: NodeKind::Root,
                successors: Vec::new(),
            },
            Node {
                kind: NodeKind::Dummy,
                successors: Vec::new(),
            },
        ];
        Self {
            nodes,
            rules: Vec::new(),
            type_filters: HashMap::new(),
            aggregators: AggregatorRegistry::new(),
        }
    }

    /// Uses `registry` to resolve custom aggregators of rules added later.
    #[must_use]
    pub fn with_aggregators(mut self, registry: AggregatorRegistry) -> Self {
        self.aggregators = registry;
        self
    }

    /// Registers a custom aggregator.
    #[must_use]
    pub fn with_aggregator<F>(mut self, name: impl Into<Arc<str>>, factory: F) -> Self
    where
        F: Fn(&AggregateExpressions) -> Result<Box<dyn Aggregator>> + Send + Sync + 'static,
    {
        self.aggregators.register(name, factory);
        self
    }

    /// Compiles a rule and attaches it.
    ///
    /// # Errors
    /// Returns a compile error naming the rule. The builder is left as it was.
    pub fn add_rule(&mut self, definition: RuleDefinition) -> Result<RuleId> {
        let name = Arc::clone(&definition.name);
        definition.validate()?;
        let nodes = self.nodes.clone();
        let type_filters = self.type_filters.clone();
        match self.compile(definition) {
            Ok(id) => {
                debug!(rule = %name, nodes = self.nodes.len(), "rule attached");
                Ok(id)
            }
            Err(err) => {
                self.nodes = nodes;
                self.type_filters = type_filters;
                Err(err.in_rule(&name))
            }
        }
    }

    /// Compiles several rules.
    ///
    /// # Errors
    /// Returns the first compile error; earlier rules stay attached.
    pub fn add_rules(
        &mut self,
        definitions: impl IntoIterator<Item = RuleDefinition>,
    ) -> Result<Vec<RuleId>> {
        definitions
            .into_iter()
            .map(|definition| self.add_rule(definition))
            .collect()
    }

    /// Number of rules attached so far.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Finishes the network.
    #[must_use]
    pub fn build(self) -> Network {
        Network {
            nodes: self.nodes,
            rules: self.rules,
        }
    }

    // -------------------------------------------------------------------------
    // Rules
    // -------------------------------------------------------------------------

    fn compile(&mut self, definition: RuleDefinition) -> Result<RuleId> {
        let id = RuleId::new(self.rules.len());
        let mut ctx = BuildContext {
            left: DUMMY,
            positions: Vec::new(),
        };
        for (index, element) in definition.lhs.iter().enumerate() {
            self.element(&mut ctx, element)
                .map_err(|e| e.in_frame(format!("element #{index}")))?;
        }
        self.attach(ctx.left, NodeKind::Terminal { rule: id });

        let declarations = definition.declarations();
        let names: Vec<Option<Arc<str>>> = declarations
            .iter()
            .map(|d| Some(Arc::clone(&d.name)))
            .collect();
        let bound: Vec<Option<Arc<str>>> = ctx
            .positions
            .iter()
            .map(|p| p.as_ref().map(|d| Arc::clone(&d.name)))
            .collect();
        let fact_map = IndexMap::create(&names, &bound);

        let actions = definition
            .actions
            .iter()
            .enumerate()
            .map(|(index, action)| {
                compile_action(action, &declarations, &fact_map, &definition.dependencies)
                    .map_err(|e| e.in_frame(format!("action #{index}")))
            })
            .collect::<Result<Vec<_>>>()?;

        self.rules
            .push(Arc::new(CompiledRule::new(id, definition, actions, fact_map)));
        Ok(id)
    }

    fn element(&mut self, ctx: &mut BuildContext, element: &RuleElement) -> Result<()> {
        match element {
            RuleElement::Pattern(pattern) => {
                let (right, conditions) = self.alpha(pattern, &ctx.positions)?;
                ctx.left = self.attach_two_input(ctx.left, right, NodeKind::Join { right, conditions });
                ctx.positions.push(Some(pattern.declaration.clone()));
            }
            RuleElement::Not(source) => self.existence(ctx, source, Quantifier::Not)?,
            RuleElement::Exists(source) => self.existence(ctx, source, Quantifier::Exists)?,
            RuleElement::Aggregate(aggregate) => self.aggregate(ctx, aggregate)?,
        }
        Ok(())
    }

    fn existence(
        &mut self,
        ctx: &mut BuildContext,
        source: &ElementSource,
        quantifier: Quantifier,
    ) -> Result<()> {
        let Source {
            right, conditions, ..
        } = self.source(ctx, source)?;
        ctx.left = self.attach_two_input(
            ctx.left,
            right,
            NodeKind::Existence {
                quantifier,
                right,
                conditions,
            },
        );
        ctx.positions.push(None);
        Ok(())
    }

    fn aggregate(&mut self, ctx: &mut BuildContext, element: &AggregateElement) -> Result<()> {
        let source = self.source(ctx, &element.source)?;
        let mut expressions = AggregateExpressions::new();
        for (name, expr) in element.aggregator.expressions() {
            let compiled = compile_lhs(expr, &source.context, &source.element)
                .map_err(|e| e.in_frame(format!("aggregate expression {name}")))?;
            expressions = expressions.with(AggregateExpression::new(name, compiled));
        }
        let factory = self.aggregators.factory_for(&element.aggregator)?;
        // Fails now rather than on the first left tuple.
        factory(&expressions)?;

        let spec = AggregateSpec {
            name: Arc::clone(&element.result.name),
            expressions,
            factory,
        };
        ctx.left = self.attach_two_input(
            ctx.left,
            source.right,
            NodeKind::Aggregate {
                right: source.right,
                conditions: source.conditions,
                spec,
            },
        );
        ctx.positions.push(Some(element.result.clone()));

        if !element.conditions.is_empty() {
            let conditions = element
                .conditions
                .iter()
                .enumerate()
                .map(|(index, condition)| {
                    compile_tuple(condition, &ctx.positions)
                        .map_err(|e| e.in_frame(format!("aggregate condition #{index}")))
                })
                .collect::<Result<Vec<_>>>()?;
            ctx.left = self.attach(ctx.left, NodeKind::Filter { conditions });
        }
        Ok(())
    }

    /// Builds the right input of a negation, existential or aggregate.
    fn source(&mut self, ctx: &BuildContext, source: &ElementSource) -> Result<Source> {
        match source {
            ElementSource::Pattern(pattern) => {
                let (right, conditions) = self.alpha(pattern, &ctx.positions)?;
                Ok(Source {
                    right,
                    conditions,
                    context: ctx.positions.clone(),
                    element: pattern.declaration.clone(),
                })
            }
            ElementSource::Group(elements) => {
                let mut inner = ctx.clone();
                for (index, element) in elements.iter().enumerate() {
                    self.element(&mut inner, element)
                        .map_err(|e| e.in_frame(format!("group element #{index}")))?;
                }
                let Some(Some(element)) = inner.positions.pop() else {
                    return Err(Error::invalid_rule(
                        "the last element of a group must bind a declaration",
                    ));
                };
                let right = self.attach(inner.left, NodeKind::Adapter);
                Ok(Source {
                    right,
                    conditions: Vec::new(),
                    context: inner.positions,
                    element,
                })
            }
        }
    }

    // -------------------------------------------------------------------------
    // Alpha network
    // -------------------------------------------------------------------------

    /// Builds the alpha chain of a pattern.
    ///
    /// Fact-only conditions become selection nodes; the rest are returned as
    /// join conditions for the beta node that consumes the alpha memory.
    fn alpha(
        &mut self,
        pattern: &PatternElement,
        positions: &[Option<Declaration>],
    ) -> Result<(NodeId, Vec<LhsExpression>)> {
        let declaration = &pattern.declaration;
        let mut selections = Vec::new();
        let mut joins = Vec::new();
        for (index, condition) in pattern.conditions.iter().enumerate() {
            let compiled = compile_lhs(condition, positions, declaration).map_err(|e| {
                e.in_frame(format!("condition #{index} of {}", declaration.name))
            })?;
            match compiled {
                LhsExpression::Fact(expr) => selections.push(expr),
                join @ LhsExpression::TupleFact(_) => joins.push(join),
            }
        }

        let mut node = self.type_filter(&declaration.fact_type);
        for selection in selections {
            node = self.attach(node, NodeKind::Selection(selection));
        }
        Ok((self.alpha_memory(node), joins))
    }

    fn type_filter(&mut self, fact_type: &Type) -> NodeId {
        if let Some(id) = self.type_filters.get(fact_type) {
            return *id;
        }
        let id = self.attach(ROOT, NodeKind::TypeFilter(fact_type.clone()));
        self.type_filters.insert(fact_type.clone(), id);
        id
    }

    fn alpha_memory(&mut self, parent: NodeId) -> NodeId {
        let existing = self.nodes[parent.0]
            .successors
            .iter()
            .copied()
            .find(|s| matches!(self.nodes[s.0].kind, NodeKind::AlphaMemory));
        existing.unwrap_or_else(|| self.attach(parent, NodeKind::AlphaMemory))
    }

    // -------------------------------------------------------------------------
    // Nodes
    // -------------------------------------------------------------------------

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            successors: Vec::new(),
        });
        id
    }

    fn attach(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = self.push(kind);
        self.nodes[parent.0].successors.push(id);
        id
    }

    fn attach_two_input(&mut self, left: NodeId, right: NodeId, kind: NodeKind) -> NodeId {
        let id = self.attach(left, kind);
        self.nodes[right.0].successors.push(id);
        id
    }
}
