//! Workflow → CWL Workflow
//!
//! Calls become steps. Scatter and conditional blocks become steps running an
//! embedded workflow; names a block body reads from outside are captured as
//! inputs of that embedded workflow and wired in by the enclosing step.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde_yaml::{Mapping, Value};
use tracing::debug;

use super::{
    container_param, cwl_default, cwl_type, insert, mapping, string, to_yaml, CwlDocument,
    WriterOptions, CWL_VERSION,
};
use crate::error::{ConvertError, Location, Result};
use crate::ir::{
    CallStep, ConditionalBlock, Expr, Literal, Parameter, ScatterBlock, Span, WdlType, Workflow,
    WorkflowElement,
};
use crate::namespace::{Callable, Namespace};
use crate::translate::{Binding, ExprTranslator, RefResolver, Rendered};

/// Longest chain of declarations followed when wiring a value
const MAX_INLINE: usize = 32;

/// Emit the CWL Workflow document for `workflow`
pub fn write_workflow(
    workflow: &Workflow,
    namespace: &Namespace,
    file: &Path,
    options: &WriterOptions,
) -> Result<CwlDocument> {
    let (lifted, body) = lift(workflow, namespace);
    let writer = WorkflowWriter {
        workflow,
        namespace,
        file,
        options,
        features: Features::default(),
    };
    let document = writer.document(&lifted, &body)?;
    debug!(workflow = %workflow.name, lifted = lifted.len(), "Workflow written");

    Ok(CwlDocument {
        name: workflow.name.clone(),
        yaml: to_yaml(&workflow.name, &document)?,
        warnings: Vec::new(),
    })
}

// ═══════════════════════════════════════════════════════════════
// Input lifting
// ═══════════════════════════════════════════════════════════════

/// Bind every unbound container input and required input of each call to a
/// new workflow input `<call>_<param>`; a call to a sub-workflow also binds
/// the inputs that sub-workflow lifted for its own calls
fn lift(workflow: &Workflow, namespace: &Namespace) -> (Vec<Parameter>, Vec<WorkflowElement>) {
    let mut active = BTreeSet::new();
    lift_workflow(workflow, namespace, &mut active)
}

fn lift_workflow(
    workflow: &Workflow,
    namespace: &Namespace,
    active: &mut BTreeSet<String>,
) -> (Vec<Parameter>, Vec<WorkflowElement>) {
    let mut lifter = Lifter {
        namespace,
        used: workflow.inputs.iter().map(|p| p.name.clone()).collect(),
        lifted: Vec::new(),
        active: &mut *active,
    };
    lifter.active.insert(workflow.name.clone());
    let mut body = workflow.body.clone();
    lifter.body(&mut body);
    let lifted = lifter.lifted;
    active.remove(&workflow.name);
    (lifted, body)
}

struct Lifter<'a> {
    namespace: &'a Namespace,
    used: BTreeSet<String>,
    lifted: Vec<Parameter>,
    /// Workflows whose lifting is in progress; a call back into one is skipped
    active: &'a mut BTreeSet<String>,
}

impl Lifter<'_> {
    fn body(&mut self, body: &mut [WorkflowElement]) {
        for element in body.iter_mut() {
            match element {
                WorkflowElement::Call(call) => self.call(call),
                WorkflowElement::Scatter(block) => self.body(&mut block.body),
                WorkflowElement::Conditional(block) => self.body(&mut block.body),
                WorkflowElement::Declaration(_) => {}
            }
        }
    }

    fn call(&mut self, call: &mut CallStep) {
        let Some(callee) = self.namespace.resolve(&call.target) else {
            return;
        };

        let mut wanted: Vec<(String, WdlType)> = Vec::new();
        match callee {
            Callable::Task(task) => {
                if let Some(container) = container_param(task) {
                    let ty = task
                        .input(&container.param)
                        .map(|p| p.ty.clone())
                        .unwrap_or(WdlType::String);
                    wanted.push((container.param, WdlType::optional(ty)));
                }
            }
            Callable::Workflow(workflow) => {
                if !self.active.contains(&workflow.name) {
                    let (nested, _) = lift_workflow(workflow, self.namespace, self.active);
                    wanted.extend(nested.into_iter().map(|p| (p.name, p.ty)));
                }
            }
        }
        for param in callee.inputs() {
            if param.is_required() {
                wanted.push((param.name.clone(), param.ty.clone()));
            }
        }

        for (param, ty) in wanted {
            if call.binding(&param).is_some() {
                continue;
            }
            let name = unique(&format!("{}_{}", call.name(), param), &mut self.used);
            debug!(call = %call.name(), input = %name, "Lifting unbound input");
            call.inputs.push((param, Expr::ident(&name)));
            self.lifted.push(Parameter {
                name,
                ty,
                default: None,
                span: call.span,
            });
        }
    }
}

fn unique(base: &str, used: &mut BTreeSet<String>) -> String {
    let mut candidate = base.to_string();
    let mut n = 2;
    while !used.insert(candidate.clone()) {
        candidate = format!("{}_{}", base, n);
        n += 1;
    }
    candidate
}

/// Step id of every element of a body, blocks named `scatter_<var>` / `if_<n>`
fn step_ids(body: &[WorkflowElement]) -> Vec<String> {
    let mut used: BTreeSet<String> = body
        .iter()
        .filter_map(|element| match element {
            WorkflowElement::Call(call) => Some(call.name().to_string()),
            _ => None,
        })
        .collect();
    let mut conditionals = 0;

    body.iter()
        .map(|element| match element {
            WorkflowElement::Call(call) => call.name().to_string(),
            WorkflowElement::Declaration(decl) => decl.name.clone(),
            WorkflowElement::Scatter(block) => {
                unique(&format!("scatter_{}", block.variable), &mut used)
            }
            WorkflowElement::Conditional(_) => {
                conditionals += 1;
                unique(&format!("if_{}", conditionals), &mut used)
            }
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════
// Scopes
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum Symbol<'s> {
    /// Input of the current document, or a value it can source directly
    Source { id: String, ty: WdlType },
    /// Call outputs by name: source id and type
    Call(BTreeMap<String, (String, WdlType)>),
    /// Private declaration
    Inline(&'s Expr),
}

#[derive(Debug, Clone)]
enum Resolved<'s> {
    Source { id: String, ty: WdlType },
    Inline(&'s Expr),
}

/// Value read from an enclosing document; becomes an embedded input
#[derive(Debug, Clone)]
struct Capture {
    id: String,
    path: Vec<String>,
    ty: WdlType,
}

/// Names visible to one CWL document (root or embedded)
struct Scope<'s> {
    parent: Option<&'s Scope<'s>>,
    symbols: BTreeMap<String, Symbol<'s>>,
    captures: RefCell<Vec<Capture>>,
}

impl<'s> Scope<'s> {
    fn root() -> Self {
        Self {
            parent: None,
            symbols: BTreeMap::new(),
            captures: RefCell::new(Vec::new()),
        }
    }

    fn child(parent: &'s Scope<'s>) -> Self {
        Self {
            parent: Some(parent),
            symbols: BTreeMap::new(),
            captures: RefCell::new(Vec::new()),
        }
    }

    fn define(&mut self, name: impl Into<String>, symbol: Symbol<'s>) {
        self.symbols.insert(name.into(), symbol);
    }

    fn lookup(&self, path: &[String]) -> Option<Resolved<'s>> {
        let (root, rest) = path.split_first()?;
        if let Some(symbol) = self.symbols.get(root) {
            return match (symbol, rest) {
                (Symbol::Source { id, ty }, []) => Some(Resolved::Source {
                    id: id.clone(),
                    ty: ty.clone(),
                }),
                (Symbol::Call(outputs), [output]) => {
                    outputs.get(output).map(|(id, ty)| Resolved::Source {
                        id: id.clone(),
                        ty: ty.clone(),
                    })
                }
                (Symbol::Inline(expr), []) => Some(Resolved::Inline(*expr)),
                _ => None,
            };
        }

        match self.parent?.lookup(path)? {
            Resolved::Inline(expr) => Some(Resolved::Inline(expr)),
            Resolved::Source { ty, .. } => {
                let id = path.join("_");
                let mut captures = self.captures.borrow_mut();
                if !captures.iter().any(|c| c.id == id) {
                    captures.push(Capture {
                        id: id.clone(),
                        path: path.to_vec(),
                        ty: ty.clone(),
                    });
                }
                Some(Resolved::Source { id, ty })
            }
        }
    }

    /// Source of a call output defined at this level
    fn local_output(&self, call: &str, output: &str) -> Option<(String, WdlType)> {
        match self.symbols.get(call)? {
            Symbol::Call(outputs) => outputs.get(output).cloned(),
            _ => None,
        }
    }
}

/// Step input bindings: references become `self` / `self[i]`
struct StepSources<'r, 's> {
    scope: &'r Scope<'s>,
    single: bool,
    sources: RefCell<Vec<String>>,
}

impl<'r, 's> StepSources<'r, 's> {
    fn new(scope: &'r Scope<'s>, single: bool) -> Self {
        Self {
            scope,
            single,
            sources: RefCell::new(Vec::new()),
        }
    }
}

impl RefResolver for StepSources<'_, '_> {
    fn resolve(&self, path: &[String]) -> Option<Binding<'_>> {
        match self.scope.lookup(path)? {
            Resolved::Inline(expr) => Some(Binding::Inline(expr)),
            Resolved::Source { id, ty } => {
                let mut sources = self.sources.borrow_mut();
                let index = match sources.iter().position(|s| *s == id) {
                    Some(index) => index,
                    None => {
                        sources.push(id);
                        sources.len() - 1
                    }
                };
                let js = if self.single {
                    "self".to_string()
                } else {
                    format!("self[{}]", index)
                };
                Some(Binding::Value { js, ty })
            }
        }
    }
}

/// `when:` guards: references become step inputs named `<path>`
struct GuardInputs<'r, 's> {
    scope: &'r Scope<'s>,
    inputs: RefCell<Vec<(String, String)>>,
}

impl RefResolver for GuardInputs<'_, '_> {
    fn resolve(&self, path: &[String]) -> Option<Binding<'_>> {
        match self.scope.lookup(path)? {
            Resolved::Inline(expr) => Some(Binding::Inline(expr)),
            Resolved::Source { id, ty } => {
                let name = path.join("_");
                let mut inputs = self.inputs.borrow_mut();
                if !inputs.iter().any(|(n, _)| *n == name) {
                    inputs.push((name.clone(), id));
                }
                Some(Binding::Value {
                    js: format!("inputs.{}", name),
                    ty,
                })
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// Emission
// ═══════════════════════════════════════════════════════════════

/// Requirements collected while emitting, declared once on the root document
#[derive(Default)]
struct Features {
    js: Cell<bool>,
    subworkflow: Cell<bool>,
    scatter: Cell<bool>,
    multiple_input: Cell<bool>,
    step_input_expression: Cell<bool>,
}

impl Features {
    fn requirements(&self) -> Vec<Value> {
        [
            (self.js.get(), "InlineJavascriptRequirement"),
            (self.subworkflow.get(), "SubworkflowFeatureRequirement"),
            (self.scatter.get(), "ScatterFeatureRequirement"),
            (self.multiple_input.get(), "MultipleInputFeatureRequirement"),
            (self.step_input_expression.get(), "StepInputExpressionRequirement"),
        ]
        .into_iter()
        .filter(|(needed, _)| *needed)
        .map(|(_, class)| mapping([("class", string(class))]))
        .collect()
    }
}

/// An embedded workflow and what its enclosing step must wire
struct Embedded {
    run: Value,
    out: Vec<Value>,
    captures: Vec<Capture>,
}

struct WorkflowWriter<'w> {
    workflow: &'w Workflow,
    namespace: &'w Namespace,
    file: &'w Path,
    options: &'w WriterOptions,
    features: Features,
}

impl<'w> WorkflowWriter<'w> {
    fn location(&self, span: Span) -> Location {
        Location::new(self.file, span)
    }

    fn unsupported(&self, expr: &Expr, span: Span, context: impl Into<String>) -> ConvertError {
        ConvertError::UnsupportedExpression {
            location: self.location(span),
            kind: expr.kind().to_string(),
            expr: expr.to_string(),
            context: context.into(),
        }
    }

    fn document(&self, lifted: &[Parameter], body: &[WorkflowElement]) -> Result<Value> {
        let mut root = Scope::root();
        let mut inputs = Mapping::new();
        for param in self.workflow.inputs.iter().chain(lifted) {
            root.define(
                param.name.clone(),
                Symbol::Source {
                    id: param.name.clone(),
                    ty: param.ty.clone(),
                },
            );
            insert(&mut inputs, param.name.clone(), self.input(param)?);
        }

        let ids = step_ids(body);
        self.declare(body, &ids, &mut root);
        let steps = self.steps(body, &ids, &root)?;

        let mut outputs = Mapping::new();
        for output in &self.workflow.outputs {
            let context = format!("output '{}' of workflow '{}'", output.name, self.workflow.name);
            let mut sources = self
                .output_sources(&output.expr, &root, 0)
                .ok_or_else(|| self.unsupported(&output.expr, output.span, context))?;

            let mut entry = Mapping::new();
            insert(&mut entry, "type", cwl_type(&output.ty));
            if sources.len() == 1 {
                insert(&mut entry, "outputSource", string(sources.remove(0)));
            } else {
                self.features.multiple_input.set(true);
                insert(
                    &mut entry,
                    "outputSource",
                    Value::Sequence(sources.into_iter().map(string).collect()),
                );
                insert(&mut entry, "pickValue", string("first_non_null"));
            }
            insert(&mut outputs, output.name.clone(), Value::Mapping(entry));
        }

        let mut doc = Mapping::new();
        insert(&mut doc, "cwlVersion", string(CWL_VERSION));
        insert(&mut doc, "class", string("Workflow"));
        insert(&mut doc, "id", string(self.workflow.name.clone()));
        let requirements = self.features.requirements();
        if !requirements.is_empty() {
            insert(&mut doc, "requirements", Value::Sequence(requirements));
        }
        insert(&mut doc, "inputs", Value::Mapping(inputs));
        insert(&mut doc, "outputs", Value::Mapping(outputs));
        insert(&mut doc, "steps", Value::Mapping(steps));
        Ok(Value::Mapping(doc))
    }

    fn input(&self, param: &Parameter) -> Result<Value> {
        let mut entry = Mapping::new();
        insert(&mut entry, "type", cwl_type(&param.ty));
        if let Some(default) = &param.default {
            match default.literal_value() {
                Some(Literal::None) => {}
                Some(lit) => insert(&mut entry, "default", cwl_default(&lit, &param.ty)),
                None => {
                    return Err(self.unsupported(
                        default,
                        param.span,
                        format!("default of workflow input '{}'", param.name),
                    ))
                }
            }
        }
        Ok(Value::Mapping(entry))
    }

    /// Output names of every call a body exposes, typed as seen at its level
    fn exports(&self, body: &[WorkflowElement]) -> Vec<(String, Vec<(String, WdlType)>)> {
        let mut out = Vec::new();
        for element in body {
            match element {
                WorkflowElement::Call(call) => {
                    if let Some(callee) = self.namespace.resolve(&call.target) {
                        let outputs = callee
                            .outputs()
                            .iter()
                            .map(|o| (o.name.clone(), o.ty.clone()))
                            .collect();
                        out.push((call.name().to_string(), outputs));
                    }
                }
                WorkflowElement::Scatter(block) => {
                    out.extend(wrap_exports(self.exports(&block.body), WdlType::array))
                }
                WorkflowElement::Conditional(block) => {
                    out.extend(wrap_exports(self.exports(&block.body), WdlType::optional))
                }
                WorkflowElement::Declaration(_) => {}
            }
        }
        out
    }

    /// Register the names a body defines, before any step is emitted
    fn declare<'s>(&self, body: &'s [WorkflowElement], ids: &[String], scope: &mut Scope<'s>) {
        for (element, id) in body.iter().zip(ids) {
            match element {
                WorkflowElement::Declaration(decl) => {
                    scope.define(decl.name.clone(), Symbol::Inline(&decl.expr));
                }
                WorkflowElement::Call(call) => {
                    let Some(callee) = self.namespace.resolve(&call.target) else {
                        continue;
                    };
                    let outputs = callee
                        .outputs()
                        .iter()
                        .map(|o| (o.name.clone(), (format!("{}/{}", id, o.name), o.ty.clone())))
                        .collect();
                    scope.define(call.name(), Symbol::Call(outputs));
                }
                WorkflowElement::Scatter(ScatterBlock { body, .. })
                | WorkflowElement::Conditional(ConditionalBlock { body, .. }) => {
                    let wrap: fn(WdlType) -> WdlType = match element {
                        WorkflowElement::Scatter(_) => WdlType::array,
                        _ => WdlType::optional,
                    };
                    for (call, outputs) in self.exports(body) {
                        let outputs = outputs
                            .into_iter()
                            .map(|(name, ty)| {
                                let source = format!("{}/{}_{}", id, call, name);
                                (name, (source, wrap(ty)))
                            })
                            .collect();
                        scope.define(call, Symbol::Call(outputs));
                    }
                }
            }
        }
    }

    fn steps<'s>(&self, body: &'s [WorkflowElement], ids: &[String], scope: &'s Scope<'s>) -> Result<Mapping> {
        let mut steps = Mapping::new();
        for (element, id) in body.iter().zip(ids) {
            let step = match element {
                WorkflowElement::Declaration(_) => continue,
                WorkflowElement::Call(call) => self.call_step(call, scope)?,
                WorkflowElement::Scatter(block) => self.scatter_step(block, scope)?,
                WorkflowElement::Conditional(block) => self.conditional_step(block, scope)?,
            };
            insert(&mut steps, id.clone(), step);
        }
        Ok(steps)
    }

    fn call_step(&self, call: &CallStep, scope: &Scope<'_>) -> Result<Value> {
        let callee = self
            .namespace
            .resolve(&call.target)
            .ok_or_else(|| ConvertError::UnresolvedReference {
                location: self.location(call.span),
                name: call.target.clone(),
                context: "call target".to_string(),
            })?;

        let run = match callee {
            Callable::Task(task) => format!("{}/{}.cwl", self.options.tools_dir, task.name),
            Callable::Workflow(workflow) => {
                self.features.subworkflow.set(true);
                format!("{}.cwl", workflow.name)
            }
        };

        let mut inputs = Mapping::new();
        for (name, expr) in &call.inputs {
            let ty = callee
                .inputs()
                .iter()
                .find(|p| p.name == *name)
                .map(|p| p.ty.clone())
                .unwrap_or(WdlType::String);
            let context = format!("input '{}' of call '{}'", name, call.name());
            if let Some(value) = self.step_input(expr, &ty, scope, call.span, &context, 0)? {
                insert(&mut inputs, name.clone(), value);
            }
        }

        let out = callee
            .outputs()
            .iter()
            .map(|o| string(o.name.clone()))
            .collect();

        Ok(mapping([
            ("run", string(run)),
            ("in", Value::Mapping(inputs)),
            ("out", Value::Sequence(out)),
        ]))
    }

    /// Step input for one binding; `None` when it binds nothing
    fn step_input(
        &self,
        expr: &Expr,
        ty: &WdlType,
        scope: &Scope<'_>,
        span: Span,
        context: &str,
        depth: usize,
    ) -> Result<Option<Value>> {
        if let Some(lit) = expr.literal_value() {
            if lit == Literal::None {
                return Ok(None);
            }
            return Ok(Some(mapping([("default", cwl_default(&lit, ty))])));
        }

        match expr {
            Expr::Ref(path) => match scope.lookup(path) {
                Some(Resolved::Source { id, .. }) => {
                    return Ok(Some(mapping([("source", string(id))])))
                }
                Some(Resolved::Inline(inner)) if depth < MAX_INLINE => {
                    return self.step_input(inner, ty, scope, span, context, depth + 1)
                }
                Some(Resolved::Inline(_)) => return Err(self.unsupported(expr, span, context)),
                None => {
                    return Err(ConvertError::UnresolvedReference {
                        location: self.location(span),
                        name: path.join("."),
                        context: context.to_string(),
                    })
                }
            },
            Expr::FirstDefined(items) => {
                if let Some(value) = self.first_defined(items, ty, scope) {
                    return Ok(Some(value));
                }
            }
            _ => {}
        }

        self.computed_input(expr, scope, span, context).map(Some)
    }

    /// `select_first([ref, ..., literal?])` as sources plus default or pickValue
    fn first_defined(&self, items: &[Expr], ty: &WdlType, scope: &Scope<'_>) -> Option<Value> {
        let (last, rest) = items.split_last()?;
        let (refs, default) = match last.literal_value() {
            Some(lit) => (rest, Some(lit)),
            None => (items, None),
        };

        let mut sources: Vec<String> = Vec::with_capacity(refs.len());
        for item in refs {
            let Expr::Ref(path) = item else { return None };
            match scope.lookup(path)? {
                Resolved::Source { id, .. } => sources.push(id),
                Resolved::Inline(_) => return None,
            }
        }

        match (sources.len(), default) {
            (1, Some(lit)) => Some(mapping([
                ("source", string(sources.remove(0))),
                ("default", cwl_default(&lit, ty)),
            ])),
            (1, None) => Some(mapping([("source", string(sources.remove(0)))])),
            (n, None) if n > 1 => {
                self.features.multiple_input.set(true);
                Some(mapping([
                    ("source", Value::Sequence(sources.into_iter().map(string).collect())),
                    ("pickValue", string("first_non_null")),
                ]))
            }
            _ => None,
        }
    }

    /// Any other translatable binding: sources plus `valueFrom`
    fn computed_input(&self, expr: &Expr, scope: &Scope<'_>, span: Span, context: &str) -> Result<Value> {
        let first = StepSources::new(scope, false);
        let mut rendered = self.render_input(&first, expr, span, context)?;
        let mut sources = first.sources.into_inner();
        if sources.len() == 1 {
            let single = StepSources::new(scope, true);
            rendered = self.render_input(&single, expr, span, context)?;
            sources = single.sources.into_inner();
        }

        let mut entry = Mapping::new();
        match sources.len() {
            0 => {}
            1 => insert(&mut entry, "source", string(sources.remove(0))),
            _ => {
                self.features.multiple_input.set(true);
                insert(
                    &mut entry,
                    "source",
                    Value::Sequence(sources.into_iter().map(string).collect()),
                );
            }
        }
        insert(&mut entry, "valueFrom", string(rendered.text));

        self.features.step_input_expression.set(true);
        if rendered.needs_js {
            self.features.js.set(true);
        }
        Ok(Value::Mapping(entry))
    }

    fn render_input(
        &self,
        resolver: &dyn RefResolver,
        expr: &Expr,
        span: Span,
        context: &str,
    ) -> Result<Rendered> {
        let tr = ExprTranslator::new(resolver, self.location(span), context);
        match expr {
            Expr::Interpolation(_) => tr.template(expr),
            _ => tr.value(expr),
        }
    }

    fn scatter_step<'s>(&self, block: &'s ScatterBlock, scope: &'s Scope<'s>) -> Result<Value> {
        self.features.scatter.set(true);
        self.features.subworkflow.set(true);

        let (collection, ty) = self
            .collection(&block.collection, scope, 0)
            .ok_or_else(|| self.unsupported(&block.collection, block.span, "scatter collection"))?;
        let item = ty
            .item()
            .cloned()
            .ok_or_else(|| ConvertError::UnresolvedReference {
                location: self.location(block.span),
                name: block.collection.to_string(),
                context: format!("scatter collection (type {} is not an array)", ty),
            })?;

        let mut inner = Scope::child(scope);
        inner.define(
            block.variable.clone(),
            Symbol::Source {
                id: block.variable.clone(),
                ty: item.clone(),
            },
        );
        let embedded = self.embedded(&block.body, inner, vec![(block.variable.clone(), item)])?;

        let mut inputs = Mapping::new();
        insert(
            &mut inputs,
            block.variable.clone(),
            mapping([("source", string(collection))]),
        );
        self.wire_captures(&mut inputs, &embedded.captures, scope, block.span)?;

        Ok(mapping([
            ("run", embedded.run),
            ("scatter", string(block.variable.clone())),
            ("in", Value::Mapping(inputs)),
            ("out", Value::Sequence(embedded.out)),
        ]))
    }

    fn conditional_step<'s>(&self, block: &'s ConditionalBlock, scope: &'s Scope<'s>) -> Result<Value> {
        self.features.subworkflow.set(true);

        let guard_inputs = GuardInputs {
            scope,
            inputs: RefCell::new(Vec::new()),
        };
        let when = ExprTranslator::new(&guard_inputs, self.location(block.span), "if guard")
            .guard(&block.guard)?;
        if when.needs_js {
            self.features.js.set(true);
        }

        let embedded = self.embedded(&block.body, Scope::child(scope), Vec::new())?;

        let mut inputs = Mapping::new();
        for (name, id) in guard_inputs.inputs.into_inner() {
            insert(&mut inputs, name, mapping([("source", string(id))]));
        }
        self.wire_captures(&mut inputs, &embedded.captures, scope, block.span)?;

        Ok(mapping([
            ("run", embedded.run),
            ("when", string(when.text)),
            ("in", Value::Mapping(inputs)),
            ("out", Value::Sequence(embedded.out)),
        ]))
    }

    fn embedded<'s>(
        &self,
        body: &'s [WorkflowElement],
        mut inner: Scope<'s>,
        own_inputs: Vec<(String, WdlType)>,
    ) -> Result<Embedded> {
        let ids = step_ids(body);
        self.declare(body, &ids, &mut inner);
        let steps = self.steps(body, &ids, &inner)?;

        let mut outputs = Mapping::new();
        let mut out = Vec::new();
        for (call, names) in self.exports(body) {
            for (name, _) in names {
                let Some((source, ty)) = inner.local_output(&call, &name) else {
                    continue;
                };
                let id = format!("{}_{}", call, name);
                insert(
                    &mut outputs,
                    id.clone(),
                    mapping([("type", cwl_type(&ty)), ("outputSource", string(source))]),
                );
                out.push(string(id));
            }
        }

        let captures = inner.captures.into_inner();
        let mut inputs = Mapping::new();
        for (name, ty) in own_inputs {
            insert(&mut inputs, name, mapping([("type", cwl_type(&ty))]));
        }
        for capture in &captures {
            insert(
                &mut inputs,
                capture.id.clone(),
                mapping([("type", cwl_type(&capture.ty))]),
            );
        }

        let run = mapping([
            ("class", string("Workflow")),
            ("inputs", Value::Mapping(inputs)),
            ("outputs", Value::Mapping(outputs)),
            ("steps", Value::Mapping(steps)),
        ]);
        Ok(Embedded { run, out, captures })
    }

    /// Feed each captured value from the enclosing document into the step
    fn wire_captures(
        &self,
        inputs: &mut Mapping,
        captures: &[Capture],
        scope: &Scope<'_>,
        span: Span,
    ) -> Result<()> {
        for capture in captures {
            if inputs.contains_key(capture.id.as_str()) {
                continue;
            }
            match scope.lookup(&capture.path) {
                Some(Resolved::Source { id, .. }) => {
                    insert(inputs, capture.id.clone(), mapping([("source", string(id))]))
                }
                _ => {
                    return Err(ConvertError::UnresolvedReference {
                        location: self.location(span),
                        name: capture.path.join("."),
                        context: "block body".to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    fn collection(&self, expr: &Expr, scope: &Scope<'_>, depth: usize) -> Option<(String, WdlType)> {
        let Expr::Ref(path) = expr else { return None };
        match scope.lookup(path)? {
            Resolved::Source { id, ty } => Some((id, ty)),
            Resolved::Inline(inner) if depth < MAX_INLINE => self.collection(inner, scope, depth + 1),
            Resolved::Inline(_) => None,
        }
    }

    /// Sources of a workflow output: a reference, or `select_first` of references
    fn output_sources(&self, expr: &Expr, scope: &Scope<'_>, depth: usize) -> Option<Vec<String>> {
        if depth > MAX_INLINE {
            return None;
        }
        match expr {
            Expr::Ref(path) => match scope.lookup(path)? {
                Resolved::Source { id, .. } => Some(vec![id]),
                Resolved::Inline(inner) => self.output_sources(inner, scope, depth + 1),
            },
            Expr::FirstDefined(items) if !items.is_empty() => {
                let mut sources = Vec::new();
                for item in items {
                    match self.output_sources(item, scope, depth + 1)?.as_slice() {
                        [single] => sources.push(single.clone()),
                        _ => return None,
                    }
                }
                Some(sources)
            }
            _ => None,
        }
    }
}

fn wrap_exports(
    exports: Vec<(String, Vec<(String, WdlType)>)>,
    wrap: fn(WdlType) -> WdlType,
) -> Vec<(String, Vec<(String, WdlType)>)> {
    exports
        .into_iter()
        .map(|(call, outputs)| {
            let outputs = outputs.into_iter().map(|(n, ty)| (n, wrap(ty))).collect();
            (call, outputs)
        })
        .collect()
}
