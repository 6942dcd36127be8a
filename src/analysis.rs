//! Workflow analysis
//!
//! Summary numbers for `wdl2cwl analyze`, computed over a call dependency
//! graph: call `B` depends on call `A` when any of `B`'s bindings, or the
//! collection/guard of a block enclosing `B`, reads an output of `A`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;

use crate::ir::{Expr, Workflow, WorkflowElement};
use crate::namespace::{Callable, Namespace};
use crate::writer::referenced_callables;

/// Longest chain of declarations followed when collecting dependencies
const MAX_DEPTH: usize = 32;

/// Graph of call dependencies (Arc<str> call names)
pub struct CallGraph {
    /// call -> calls reading its outputs
    adjacency: HashMap<Arc<str>, Vec<Arc<str>>>,
    /// call -> calls it reads from
    predecessors: HashMap<Arc<str>, Vec<Arc<str>>>,
    /// Calls in source order
    calls: Vec<Arc<str>>,
}

impl CallGraph {
    pub fn from_workflow(workflow: &Workflow) -> Self {
        let mut builder = GraphBuilder::default();
        builder.declare(&workflow.body);

        let capacity = builder.calls.len();
        let mut graph = Self {
            adjacency: HashMap::with_capacity(capacity),
            predecessors: HashMap::with_capacity(capacity),
            calls: Vec::with_capacity(capacity),
        };
        for call in &builder.calls {
            let id: Arc<str> = Arc::from(call.as_str());
            graph.calls.push(Arc::clone(&id));
            graph.adjacency.insert(Arc::clone(&id), Vec::new());
            graph.predecessors.insert(id, Vec::new());
        }

        builder.edges(&workflow.body, &BTreeSet::new(), &mut graph);
        graph
    }

    fn add_edge(&mut self, from: &str, to: &str) {
        let (Some(src), Some(tgt)) = (self.node(from), self.node(to)) else {
            return;
        };
        let successors = self.adjacency.entry(Arc::clone(&src)).or_default();
        if successors.contains(&tgt) {
            return;
        }
        successors.push(Arc::clone(&tgt));
        self.predecessors.entry(tgt).or_default().push(src);
    }

    fn node(&self, name: &str) -> Option<Arc<str>> {
        self.calls.iter().find(|c| &***c == name).cloned()
    }

    pub fn calls(&self) -> &[Arc<str>] {
        &self.calls
    }

    /// Get dependencies of a call
    #[inline]
    pub fn get_dependencies(&self, call: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.predecessors
            .get(call)
            .map(|v| v.as_slice())
            .unwrap_or(EMPTY)
    }

    /// Calls grouped by dependency depth (Kahn). Calls on a cycle are left out.
    pub fn levels(&self) -> Vec<Vec<Arc<str>>> {
        let mut indegree: HashMap<&str, usize> = self
            .calls
            .iter()
            .map(|c| (&**c, self.get_dependencies(c).len()))
            .collect();

        let mut current: Vec<Arc<str>> = self
            .calls
            .iter()
            .filter(|c| self.get_dependencies(c).is_empty())
            .cloned()
            .collect();

        let mut levels = Vec::new();
        while !current.is_empty() {
            let mut next = Vec::new();
            for call in &current {
                for successor in self.adjacency.get(call).into_iter().flatten() {
                    let key: &str = successor;
                    if let Some(degree) = indegree.get_mut(key) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(Arc::clone(successor));
                        }
                    }
                }
            }
            levels.push(current);
            current = next;
        }
        levels
    }

    pub fn has_cycles(&self) -> bool {
        let placed: usize = self.levels().iter().map(Vec::len).sum();
        placed < self.calls.len()
    }
}

/// Collects call names and declaration expressions, then resolves edges
#[derive(Default)]
struct GraphBuilder<'a> {
    calls: Vec<String>,
    declarations: BTreeMap<&'a str, &'a Expr>,
}

impl<'a> GraphBuilder<'a> {
    fn declare(&mut self, body: &'a [WorkflowElement]) {
        for element in body {
            match element {
                WorkflowElement::Call(call) => self.calls.push(call.name().to_string()),
                WorkflowElement::Declaration(decl) => {
                    self.declarations.insert(&decl.name, &decl.expr);
                }
                WorkflowElement::Scatter(block) => self.declare(&block.body),
                WorkflowElement::Conditional(block) => self.declare(&block.body),
            }
        }
    }

    /// Calls whose outputs `expr` reads, through declarations
    fn upstream(&self, expr: &Expr, out: &mut BTreeSet<String>, depth: usize) {
        if depth > MAX_DEPTH {
            return;
        }
        for path in expr.references() {
            let Some(root) = path.first() else { continue };
            if path.len() > 1 && self.calls.iter().any(|c| c == root) {
                out.insert(root.clone());
            } else if let Some(decl) = self.declarations.get(root.as_str()) {
                self.upstream(decl, out, depth + 1);
            }
        }
    }

    fn edges(&self, body: &[WorkflowElement], enclosing: &BTreeSet<String>, graph: &mut CallGraph) {
        for element in body {
            match element {
                WorkflowElement::Call(call) => {
                    let mut deps = enclosing.clone();
                    for (_, expr) in &call.inputs {
                        self.upstream(expr, &mut deps, 0);
                    }
                    for dep in deps {
                        graph.add_edge(&dep, call.name());
                    }
                }
                WorkflowElement::Scatter(block) => {
                    let mut deps = enclosing.clone();
                    self.upstream(&block.collection, &mut deps, 0);
                    self.edges(&block.body, &deps, graph);
                }
                WorkflowElement::Conditional(block) => {
                    let mut deps = enclosing.clone();
                    self.upstream(&block.guard, &mut deps, 0);
                    self.edges(&block.body, &deps, graph);
                }
                WorkflowElement::Declaration(_) => {}
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowAnalysis {
    pub name: String,
    pub inputs: usize,
    pub outputs: usize,
    /// Distinct tasks called, nested workflows included, sorted
    pub tasks: Vec<String>,
    /// Call statements, nested blocks included
    pub calls: usize,
    pub scatters: usize,
    pub conditionals: usize,
    /// Widest level of the call dependency graph
    pub max_parallelism: usize,
    pub has_cycles: bool,
}

pub fn analyze(workflow: &Workflow, namespace: &Namespace) -> WorkflowAnalysis {
    let graph = CallGraph::from_workflow(workflow);
    let levels = graph.levels();

    let (scatters, conditionals) = count_blocks(&workflow.body);
    let tasks: BTreeSet<String> = referenced_callables(workflow, namespace)
        .into_iter()
        .filter(|c| matches!(c, Callable::Task(_)))
        .map(|c| c.name().to_string())
        .collect();

    WorkflowAnalysis {
        name: workflow.name.clone(),
        inputs: workflow.inputs.len(),
        outputs: workflow.outputs.len(),
        tasks: tasks.into_iter().collect(),
        calls: workflow.calls().len(),
        scatters,
        conditionals,
        max_parallelism: levels.iter().map(Vec::len).max().unwrap_or(0),
        has_cycles: graph.has_cycles(),
    }
}

fn count_blocks(body: &[WorkflowElement]) -> (usize, usize) {
    body.iter().fold((0, 0), |(s, c), element| match element {
        WorkflowElement::Scatter(block) => {
            let (inner_s, inner_c) = count_blocks(&block.body);
            (s + 1 + inner_s, c + inner_c)
        }
        WorkflowElement::Conditional(block) => {
            let (inner_s, inner_c) = count_blocks(&block.body);
            (s + inner_s, c + 1 + inner_c)
        }
        _ => (s, c),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::load_source;
    use std::path::Path;

    const SRC: &str = r#"version 1.0
workflow Pipeline {
  input {
    File reads
    Boolean qc = true
  }
  call Split { input: f = reads }
  call Index { input: f = reads }
  scatter (part in Split.parts) {
    call Align { input: part = part, index = Index.idx }
  }
  if (qc) {
    call Report { input: bams = Align.bam }
  }
  output { Array[File] bams = Align.bam }
}
task Split { input { File f } command <<< split ~{f} >>> output { Array[File] parts = glob("x*") } }
task Index { input { File f } command <<< index ~{f} >>> output { File idx = "i" } }
task Align {
  input {
    File part
    File index
  }
  command <<< align ~{part} >>> output { File bam = "a.bam" } }
task Report { input { Array[File] bams } command <<< report >>> output { File html = "r.html" } }
"#;

    fn workflow() -> (Workflow, Namespace) {
        let loaded = load_source(SRC, Path::new("p.wdl")).unwrap();
        (loaded.document.workflow.clone().unwrap(), loaded.namespace)
    }

    #[test]
    fn test_dependencies_follow_outputs_and_blocks() {
        let (wf, _) = workflow();
        let graph = CallGraph::from_workflow(&wf);
        let deps: Vec<&str> = graph.get_dependencies("Align").iter().map(|d| d.as_ref()).collect();
        assert_eq!(deps, vec!["Index", "Split"]);
        let last = graph.levels().pop().unwrap();
        assert_eq!(last.iter().map(|c| c.as_ref()).collect::<Vec<&str>>(), vec!["Report"]);
        assert!(graph.get_dependencies("Split").is_empty());
    }

    #[test]
    fn test_levels_and_parallelism() {
        let (wf, ns) = workflow();
        let levels = CallGraph::from_workflow(&wf).levels();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0].len(), 2);

        let summary = analyze(&wf, &ns);
        assert_eq!(summary.max_parallelism, 2);
        assert_eq!(summary.calls, 4);
        assert_eq!(summary.scatters, 1);
        assert_eq!(summary.conditionals, 1);
        assert_eq!(summary.inputs, 2);
        assert_eq!(summary.outputs, 1);
        assert_eq!(summary.tasks, vec!["Align", "Index", "Report", "Split"]);
        assert!(!summary.has_cycles);
    }

    #[test]
    fn test_cycle_detected() {
        let src = r#"version 1.0
workflow Loop {
  call A as first { input: x = second.y }
  call A as second { input: x = first.y }
}
task A { input { Int x } command <<< echo ~{x} >>> output { Int y = 1 } }
"#;
        let loaded = load_source(src, Path::new("loop.wdl")).unwrap();
        let wf = loaded.document.workflow.as_ref().unwrap();
        let summary = analyze(wf, &loaded.namespace);
        assert!(summary.has_cycles);
        assert_eq!(summary.max_parallelism, 0);
    }
}
