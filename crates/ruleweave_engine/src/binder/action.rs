//! Action compilation and dependency resolution.
//!
//! An action is compiled to one of two invocation shapes. Actions that use no
//! dependency run with the action context and the activation's tuple; those
//! that do also receive the dependency resolver and a resolution context, and
//! resolve their services on every invocation.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ruleweave_foundation::{Error, ErrorKind, FactId, Result, Value};
use ruleweave_model::{
    ActionBody, ActionContext, ActionElement, ActionTrigger, Declaration, Dependency,
    DependencyDeclaration,
};

use super::TupleArgs;
use super::eval::{self, Evaluator};
use crate::index_map::IndexMap;
use crate::tuple::TupleView;

// =============================================================================
// Dependency Resolution
// =============================================================================

/// What a resolver knows about the firing that needs a service.
#[derive(Clone, Debug)]
pub struct ResolutionContext {
    /// Rule being fired.
    pub rule: Arc<str>,
}

/// Supplies services to actions at firing time.
pub trait DependencyResolver: Send + Sync {
    /// Resolves one declared dependency.
    ///
    /// # Errors
    /// Returns an error if the service is unavailable.
    fn resolve(
        &self,
        context: &ResolutionContext,
        dependency: &DependencyDeclaration,
    ) -> Result<Dependency>;
}

/// Resolver used when none is configured; every lookup fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDependencies;

impl DependencyResolver for NoDependencies {
    fn resolve(
        &self,
        _context: &ResolutionContext,
        dependency: &DependencyDeclaration,
    ) -> Result<Dependency> {
        Err(Error::evaluation(format!(
            "no dependency resolver configured for {}",
            dependency.type_name
        )))
    }
}

/// Resolver backed by services registered by type name.
#[derive(Clone, Default)]
pub struct DependencyRegistry {
    services: HashMap<Arc<str>, Dependency>,
}

impl DependencyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service under a type name, replacing any previous one.
    #[must_use]
    pub fn with_service<T: Any + Send + Sync>(
        mut self,
        type_name: impl Into<Arc<str>>,
        service: T,
    ) -> Self {
        self.services.insert(type_name.into(), Arc::new(service));
        self
    }
}

impl fmt::Debug for DependencyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.services.keys()).finish()
    }
}

impl DependencyResolver for DependencyRegistry {
    fn resolve(
        &self,
        _context: &ResolutionContext,
        dependency: &DependencyDeclaration,
    ) -> Result<Dependency> {
        self.services
            .get(&dependency.type_name)
            .cloned()
            .ok_or_else(|| {
                Error::evaluation(format!("no service registered for {}", dependency.type_name))
            })
    }
}

// =============================================================================
// Compiled Actions
// =============================================================================

/// Action shape for actions without dependencies.
pub type SimpleAction = dyn Fn(&mut dyn ActionContext, &dyn TupleView) -> Result<()> + Send + Sync;

/// Action shape for actions that resolve dependencies.
pub type DependentAction = dyn Fn(
        &mut dyn ActionContext,
        &dyn TupleView,
        &dyn DependencyResolver,
        &ResolutionContext,
    ) -> Result<()>
    + Send
    + Sync;

/// The invocation shape chosen for an action.
#[derive(Clone)]
pub enum ActionInvoker {
    /// `(context, tuple)`
    Simple(Arc<SimpleAction>),
    /// `(context, tuple, resolver, resolution context)`
    WithDependencies(Arc<DependentAction>),
}

/// An action ready to run against activation snapshots.
#[derive(Clone)]
pub struct CompiledAction {
    trigger: ActionTrigger,
    invoker: ActionInvoker,
}

impl CompiledAction {
    /// Triggers this action runs on.
    #[must_use]
    pub const fn trigger(&self) -> ActionTrigger {
        self.trigger
    }

    /// Returns true if the action resolves dependencies.
    #[must_use]
    pub const fn uses_dependencies(&self) -> bool {
        matches!(self.invoker, ActionInvoker::WithDependencies(_))
    }

    /// Runs the action.
    ///
    /// # Errors
    /// Returns `DependencyResolution` when a service cannot be resolved, or
    /// whatever the action itself returns.
    pub fn invoke(
        &self,
        context: &mut dyn ActionContext,
        tuple: &dyn TupleView,
        resolver: &dyn DependencyResolver,
        resolution: &ResolutionContext,
    ) -> Result<()> {
        match &self.invoker {
            ActionInvoker::Simple(f) => f(context, tuple),
            ActionInvoker::WithDependencies(f) => f(context, tuple, resolver, resolution),
        }
    }
}

impl fmt::Debug for CompiledAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledAction")
            .field("trigger", &self.trigger)
            .field("uses_dependencies", &self.uses_dependencies())
            .finish()
    }
}

fn simple<F>(f: F) -> ActionInvoker
where
    F: Fn(&mut dyn ActionContext, &dyn TupleView) -> Result<()> + Send + Sync + 'static,
{
    ActionInvoker::Simple(Arc::new(f))
}

fn dependent<F>(f: F) -> ActionInvoker
where
    F: Fn(
            &mut dyn ActionContext,
            &dyn TupleView,
            &dyn DependencyResolver,
            &ResolutionContext,
        ) -> Result<()>
        + Send
        + Sync
        + 'static,
{
    ActionInvoker::WithDependencies(Arc::new(f))
}

fn bound_fact(context: &dyn ActionContext, declaration: &str) -> Result<FactId> {
    context
        .fact(declaration)
        .ok_or_else(|| Error::unresolved_declaration(declaration))
}

fn evaluate(evaluator: &Evaluator, tuple: &dyn TupleView, slots: &[usize]) -> Result<Value> {
    evaluator(&TupleArgs { tuple, slots })
}

/// Compiles an action of a rule.
///
/// `tuple_fact_map` maps each rule declaration to its position in the
/// terminal tuple; it is composed with the map of the action's imports into
/// the rule's declarations.
///
/// # Errors
/// Returns `UnresolvedDeclaration` for an import that is not a rule
/// declaration or has no tuple position, and `UnresolvedDependency` for a
/// dependency the rule does not declare.
pub fn compile_action(
    element: &ActionElement,
    declarations: &[Declaration],
    tuple_fact_map: &IndexMap,
    dependencies: &[DependencyDeclaration],
) -> Result<CompiledAction> {
    let imports = element.imports();
    let declaration_names: Vec<Arc<str>> =
        declarations.iter().map(|d| Arc::clone(&d.name)).collect();
    let activation_map = IndexMap::create(&imports, &declaration_names);
    if let Some(missing) = activation_map.first_unmapped() {
        return Err(Error::unresolved_declaration(imports[missing].to_string()));
    }
    let fact_map = IndexMap::compose(tuple_fact_map, &activation_map);
    if let Some(hidden) = fact_map.first_unmapped() {
        return Err(super::not_visible(&imports[hidden]));
    }
    let slots: Arc<[usize]> = fact_map.iter().flatten().collect();
    let params: Vec<Declaration> = activation_map
        .iter()
        .flatten()
        .map(|i| declarations[i].clone())
        .collect();

    let dependency_names: Vec<Arc<str>> =
        dependencies.iter().map(|d| Arc::clone(&d.name)).collect();
    let dependency_map = IndexMap::create(element.dependencies(), &dependency_names);
    if let Some(missing) = dependency_map.first_unmapped() {
        return Err(Error::unresolved_dependency(
            element.dependencies()[missing].to_string(),
        ));
    }

    let invoker = match &element.body {
        ActionBody::Insert(expr) => {
            let value = eval::build(expr, &params)?;
            simple(move |context, tuple| {
                let value = evaluate(&value, tuple, &slots)?;
                context.insert(value).map(|_| ())
            })
        }
        ActionBody::Update { target, value } => {
            let value = eval::build(value, &params)?;
            let target = Arc::clone(target);
            simple(move |context, tuple| {
                let value = evaluate(&value, tuple, &slots)?;
                let fact = bound_fact(context, &target)?;
                context.update(fact, value)
            })
        }
        ActionBody::Retract(target) => {
            let target = Arc::clone(target);
            simple(move |context, _tuple| {
                let fact = bound_fact(context, &target)?;
                context.retract(fact)
            })
        }
        ActionBody::Invoke { function, args, .. } => {
            let args = args
                .iter()
                .map(|arg| eval::build(arg, &params))
                .collect::<Result<Vec<_>>>()?;
            let function = function.clone();
            if dependency_map.has_data() {
                let wanted: Vec<DependencyDeclaration> = dependency_map
                    .iter()
                    .flatten()
                    .map(|i| dependencies[i].clone())
                    .collect();
                dependent(move |context, tuple, resolver, resolution| {
                    let values = args
                        .iter()
                        .map(|arg| evaluate(arg, tuple, &slots))
                        .collect::<Result<Vec<_>>>()?;
                    let services = wanted
                        .iter()
                        .map(|dependency| {
                            resolver.resolve(resolution, dependency).map_err(|e| {
                                Error::new(ErrorKind::DependencyResolution {
                                    rule: resolution.rule.to_string(),
                                    dependency: dependency.name.to_string(),
                                    message: e.to_string(),
                                })
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;
                    (function.0)(context, &values, &services)
                })
            } else {
                simple(move |context, tuple| {
                    let values = args
                        .iter()
                        .map(|arg| evaluate(arg, tuple, &slots))
                        .collect::<Result<Vec<_>>>()?;
                    (function.0)(context, &values, &[])
                })
            }
        }
    };

    Ok(CompiledAction {
        trigger: element.trigger,
        invoker,
    })
}

// =============================================================================
// Tests
// =============================================================================
