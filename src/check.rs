//! Cross-reference checks
//!
//! A workflow is checked against its namespace before writing so one whose
//! references cannot be resolved is rejected as a whole. Every problem found
//! is reported, not just the first. A task is checked on its own, so a bad
//! command marker fails that task and leaves its siblings alone.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ConvertError, Location};
use crate::ir::{CallStep, Expr, Span, Task, WdlType, Workflow, WorkflowElement};
use crate::namespace::Namespace;

#[derive(Debug, Clone)]
enum Symbol {
    Value(WdlType),
    /// Call outputs by name
    Call(BTreeMap<String, WdlType>),
    /// Call whose target did not resolve; already reported
    Unknown,
}

type Scope = BTreeMap<String, Symbol>;

/// Check every call target, binding and reference of `workflow`
pub fn check_workflow(workflow: &Workflow, namespace: &Namespace, file: &Path) -> Vec<ConvertError> {
    let checker = Checker {
        namespace,
        file,
        errors: Vec::new(),
    };
    checker.run(workflow)
}

/// Every command marker must name a task input or private declaration
pub fn check_task(task: &Task, file: &Path) -> crate::error::Result<()> {
    for placeholder in task.command.placeholders() {
        for reference in placeholder.expr.references() {
            let root = &reference[0];
            if task.input(root).is_none() && task.declaration(root).is_none() {
                return Err(ConvertError::UnresolvedReference {
                    location: Location::new(file, placeholder.span),
                    name: root.clone(),
                    context: format!("marker {} of task '{}'", placeholder.raw, task.name),
                });
            }
        }
    }
    Ok(())
}

struct Checker<'a> {
    namespace: &'a Namespace,
    file: &'a Path,
    errors: Vec<ConvertError>,
}

impl<'a> Checker<'a> {
    fn run(mut self, workflow: &Workflow) -> Vec<ConvertError> {
        let mut scope = Scope::new();
        for input in &workflow.inputs {
            scope.insert(input.name.clone(), Symbol::Value(input.ty.clone()));
        }
        for input in &workflow.inputs {
            if let Some(default) = &input.default {
                let context = format!("default of input '{}'", input.name);
                self.check_expr(default, &scope, input.span, &context);
            }
        }

        self.declare(&workflow.body, &mut scope);
        self.check_body(&workflow.body, &scope);

        for output in &workflow.outputs {
            self.check_expr(
                &output.expr,
                &scope,
                output.span,
                &format!("output '{}' of workflow '{}'", output.name, workflow.name),
            );
        }
        self.errors
    }

    fn call_symbol(&self, call: &CallStep) -> Symbol {
        match self.namespace.resolve(&call.target) {
            Some(callable) => Symbol::Call(
                callable
                    .outputs()
                    .iter()
                    .map(|o| (o.name.clone(), o.ty.clone()))
                    .collect(),
            ),
            None => Symbol::Unknown,
        }
    }

    /// Register the names a body makes visible at its own level
    fn declare(&self, body: &[WorkflowElement], scope: &mut Scope) {
        for element in body {
            match element {
                WorkflowElement::Call(call) => {
                    scope.insert(call.name().to_string(), self.call_symbol(call));
                }
                WorkflowElement::Declaration(decl) => {
                    scope.insert(decl.name.clone(), Symbol::Value(decl.ty.clone()));
                }
                WorkflowElement::Scatter(block) => {
                    for (name, symbol) in self.exports(&block.body) {
                        scope.insert(name, wrap(symbol, WdlType::array));
                    }
                }
                WorkflowElement::Conditional(block) => {
                    for (name, symbol) in self.exports(&block.body) {
                        scope.insert(name, wrap(symbol, WdlType::optional));
                    }
                }
            }
        }
    }

    /// Calls visible outside a block, with types as seen at the block's level
    fn exports(&self, body: &[WorkflowElement]) -> Vec<(String, Symbol)> {
        let mut out = Vec::new();
        for element in body {
            match element {
                WorkflowElement::Call(call) => {
                    out.push((call.name().to_string(), self.call_symbol(call)));
                }
                WorkflowElement::Scatter(block) => out.extend(
                    self.exports(&block.body)
                        .into_iter()
                        .map(|(n, s)| (n, wrap(s, WdlType::array))),
                ),
                WorkflowElement::Conditional(block) => out.extend(
                    self.exports(&block.body)
                        .into_iter()
                        .map(|(n, s)| (n, wrap(s, WdlType::optional))),
                ),
                WorkflowElement::Declaration(_) => {}
            }
        }
        out
    }

    fn check_body(&mut self, body: &[WorkflowElement], scope: &Scope) {
        for element in body {
            match element {
                WorkflowElement::Declaration(decl) => {
                    self.check_expr(
                        &decl.expr,
                        scope,
                        decl.span,
                        &format!("declaration '{}'", decl.name),
                    );
                }
                WorkflowElement::Call(call) => self.check_call(call, scope),
                WorkflowElement::Scatter(block) => {
                    let context = format!("scatter over '{}'", block.collection);
                    self.check_expr(&block.collection, scope, block.span, &context);

                    let item = match self.type_of(&block.collection, scope) {
                        Some(ty) => match ty.item() {
                            Some(item) => Symbol::Value(item.clone()),
                            None => {
                                self.errors.push(ConvertError::UnresolvedReference {
                                    location: Location::new(self.file, block.span),
                                    name: block.collection.to_string(),
                                    context: format!("scatter collection (type {} is not an array)", ty),
                                });
                                Symbol::Unknown
                            }
                        },
                        None => Symbol::Unknown,
                    };

                    let mut inner = scope.clone();
                    inner.insert(block.variable.clone(), item);
                    self.declare(&block.body, &mut inner);
                    self.check_body(&block.body, &inner);
                }
                WorkflowElement::Conditional(block) => {
                    self.check_expr(&block.guard, scope, block.span, "if guard");
                    let mut inner = scope.clone();
                    self.declare(&block.body, &mut inner);
                    self.check_body(&block.body, &inner);
                }
            }
        }
    }

    fn check_call(&mut self, call: &CallStep, scope: &Scope) {
        let namespace = self.namespace;
        let Some(callable) = namespace.resolve(&call.target) else {
            self.errors.push(ConvertError::UnresolvedReference {
                location: Location::new(self.file, call.span),
                name: call.target.clone(),
                context: "call target".to_string(),
            });
            return;
        };

        let accepted = callable.input_names();
        for (name, expr) in &call.inputs {
            if !accepted.contains(&name.as_str()) {
                self.errors.push(ConvertError::UnresolvedReference {
                    location: Location::new(self.file, call.span),
                    name: format!("{}.{}", call.target, name),
                    context: format!("input binding of call '{}'", call.name()),
                });
            }
            self.check_expr(
                expr,
                scope,
                call.span,
                &format!("input '{}' of call '{}'", name, call.name()),
            );
        }
    }

    fn check_expr(&mut self, expr: &Expr, scope: &Scope, span: Span, context: &str) {
        for path in expr.references() {
            if lookup(scope, path).is_err() {
                self.errors.push(ConvertError::UnresolvedReference {
                    location: Location::new(self.file, span),
                    name: path.join("."),
                    context: context.to_string(),
                });
            }
        }
    }

    /// Type of a plain reference; `None` when it cannot be known here
    fn type_of(&self, expr: &Expr, scope: &Scope) -> Option<WdlType> {
        match expr {
            Expr::Ref(path) => lookup(scope, path).ok().flatten(),
            _ => None,
        }
    }
}

/// `Ok(None)` for names that exist but have no known type
fn lookup(scope: &Scope, path: &[String]) -> Result<Option<WdlType>, ()> {
    let Some((root, rest)) = path.split_first() else {
        return Err(());
    };
    match (scope.get(root), rest) {
        (Some(Symbol::Value(ty)), []) => Ok(Some(ty.clone())),
        (Some(Symbol::Call(outputs)), [output]) => {
            outputs.get(output).cloned().map(Some).ok_or(())
        }
        (Some(Symbol::Unknown), _) => Ok(None),
        _ => Err(()),
    }
}

fn wrap(symbol: Symbol, f: fn(WdlType) -> WdlType) -> Symbol {
    match symbol {
        Symbol::Value(ty) => Symbol::Value(f(ty)),
        Symbol::Call(outputs) => Symbol::Call(outputs.into_iter().map(|(k, v)| (k, f(v))).collect()),
        Symbol::Unknown => Symbol::Unknown,
    }
}
