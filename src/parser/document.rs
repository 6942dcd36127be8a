use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Diagnostic, DiagnosticKind, Location};
use crate::ir::{
    CallStep, Command, CommandPart, ConditionalBlock, Declaration, Document, Expr, Import,
    Parameter, RuntimeRequirement, ScatterBlock, Span, Task, WdlType, Workflow, WorkflowElement,
};

use super::lexer::{RawPart, TokenKind};
use super::{runtime, PResult, Parser, SyntaxError};

/// `Type name [= expr]` as written
struct Decl {
    name: String,
    ty: WdlType,
    expr: Option<Expr>,
    span: Span,
}

impl Decl {
    fn into_parameter(self) -> Parameter {
        Parameter {
            name: self.name,
            ty: self.ty,
            default: self.expr,
            span: self.span,
        }
    }
}

/// What one workflow-body statement produced
enum BodyItem {
    Element(WorkflowElement),
    /// Unbound declaration at workflow level (pre-1.0 input style)
    Input(Parameter),
}

impl<'a> Parser<'a> {
    pub(super) fn document(&mut self, path: &Path) -> PResult<Document> {
        let mut document = Document {
            path: path.to_path_buf(),
            version: None,
            imports: Vec::new(),
            tasks: Vec::new(),
            workflow: None,
            warnings: Vec::new(),
        };

        loop {
            let token = self.peek()?.clone();
            let TokenKind::Ident(keyword) = &token.kind else {
                if token.kind == TokenKind::Eof {
                    break;
                }
                return Err(SyntaxError::new(
                    token.span,
                    format!("expected 'task' or 'workflow', found {}", token.kind.describe()),
                ));
            };

            match keyword.as_str() {
                "version" => {
                    self.bump()?;
                    let version = self.raw_lexer()?.rest_of_line();
                    debug!(version = %version, "WDL version");
                    document.version = Some(version);
                }
                "import" => {
                    self.bump()?;
                    document.imports.push(self.import(token.span)?);
                }
                "task" => {
                    self.bump()?;
                    let task = self.task(token.span)?;
                    if document.task(&task.name).is_some() {
                        return Err(SyntaxError::new(
                            task.span,
                            format!("task '{}' is defined twice", task.name),
                        ));
                    }
                    document.tasks.push(task);
                }
                "workflow" => {
                    self.bump()?;
                    let workflow = self.workflow(token.span)?;
                    if let Some(first) = &document.workflow {
                        return Err(SyntaxError::new(
                            workflow.span,
                            format!(
                                "second workflow '{}' in one document (first is '{}')",
                                workflow.name, first.name
                            ),
                        ));
                    }
                    document.workflow = Some(workflow);
                }
                other => {
                    let other = other.to_string();
                    self.skip_construct()?;
                    warn!(construct = %other, line = token.span.line, "Skipping unsupported construct");
                    document.warnings.push(Diagnostic::warning(
                        DiagnosticKind::SkippedConstruct,
                        Location::new(path, token.span),
                        format!("skipped unsupported top-level construct '{}'", other),
                    ));
                }
            }
        }

        if let Some(workflow) = &mut document.workflow {
            workflow.imports = document.imports.clone();
        }
        Ok(document)
    }

    /// Skip `keyword tokens... { ... }`
    fn skip_construct(&mut self) -> PResult<()> {
        let start = self.bump()?;
        loop {
            match self.peek_kind()? {
                TokenKind::LBrace => return self.skip_block(),
                TokenKind::Eof => {
                    return Err(SyntaxError::new(start.span, "construct has no body"));
                }
                _ => {
                    self.bump()?;
                }
            }
        }
    }

    fn import(&mut self, span: Span) -> PResult<Import> {
        let token = self.bump()?;
        let path = match token.kind {
            TokenKind::Str(parts) => plain_string(parts)
                .ok_or_else(|| SyntaxError::new(token.span, "import path cannot be interpolated"))?,
            other => {
                return Err(SyntaxError::new(
                    token.span,
                    format!("expected import path, found {}", other.describe()),
                ))
            }
        };

        let mut alias = None;
        if self.at_keyword("as")? {
            self.bump()?;
            alias = Some(self.expect_ident("import alias")?.0);
        }
        // struct aliasing (`alias A as B`) has no effect without structs
        while self.at_keyword("alias")? {
            self.bump()?;
            self.expect_ident("struct name")?;
            self.expect_keyword("as")?;
            self.expect_ident("struct alias")?;
        }

        Ok(Import { path, alias, span })
    }

    fn wdl_type(&mut self) -> PResult<WdlType> {
        let (name, span) = self.expect_ident("a type")?;
        let base = match name.as_str() {
            "Array" => {
                self.expect(&TokenKind::LBracket)?;
                let item = self.wdl_type()?;
                self.expect(&TokenKind::RBracket)?;
                // non-empty marker
                self.eat(&TokenKind::Plus)?;
                WdlType::array(item)
            }
            other => WdlType::primitive(other)
                .ok_or_else(|| SyntaxError::new(span, format!("unsupported type '{}'", other)))?,
        };
        if self.eat(&TokenKind::Question)? {
            return Ok(WdlType::optional(base));
        }
        Ok(base)
    }

    fn declaration(&mut self) -> PResult<Decl> {
        let span = self.peek()?.span;
        let ty = self.wdl_type()?;
        let (name, _) = self.expect_ident("declaration name")?;
        let expr = if self.eat(&TokenKind::Assign)? {
            Some(self.expr()?)
        } else {
            None
        };
        Ok(Decl {
            name,
            ty,
            expr,
            span,
        })
    }

    fn input_section(&mut self) -> PResult<Vec<Parameter>> {
        self.expect(&TokenKind::LBrace)?;
        let mut inputs = Vec::new();
        while !self.eat(&TokenKind::RBrace)? {
            inputs.push(self.declaration()?.into_parameter());
        }
        Ok(inputs)
    }

    fn output_section(&mut self) -> PResult<Vec<Declaration>> {
        self.expect(&TokenKind::LBrace)?;
        let mut outputs = Vec::new();
        while !self.eat(&TokenKind::RBrace)? {
            let decl = self.declaration()?;
            let Some(expr) = decl.expr else {
                return Err(SyntaxError::new(
                    decl.span,
                    format!("output '{}' has no value", decl.name),
                ));
            };
            outputs.push(Declaration {
                name: decl.name,
                ty: decl.ty,
                expr,
                span: decl.span,
            });
        }
        Ok(outputs)
    }

    fn task(&mut self, span: Span) -> PResult<Task> {
        let (name, _) = self.expect_ident("task name")?;
        let open = self.expect(&TokenKind::LBrace)?;

        let mut inputs = Vec::new();
        let mut declarations = Vec::new();
        let mut outputs = Vec::new();
        let mut runtime = RuntimeRequirement::default();
        let mut command: Option<Command> = None;

        loop {
            let token = self.peek()?.clone();
            match &token.kind {
                TokenKind::RBrace => {
                    self.bump()?;
                    break;
                }
                TokenKind::Eof => {
                    return Err(SyntaxError::new(
                        open.span,
                        format!("task '{}' is not closed", name),
                    ))
                }
                TokenKind::Ident(keyword) => match keyword.as_str() {
                    "input" => {
                        self.bump()?;
                        inputs.extend(self.input_section()?);
                    }
                    "command" => {
                        self.bump()?;
                        if command.is_some() {
                            return Err(SyntaxError::new(
                                token.span,
                                format!("task '{}' has two command sections", name),
                            ));
                        }
                        command = Some(self.command(token.span)?);
                    }
                    "runtime" => {
                        self.bump()?;
                        runtime = runtime::requirement(self.runtime_section()?);
                    }
                    "output" => {
                        self.bump()?;
                        outputs.extend(self.output_section()?);
                    }
                    "meta" | "parameter_meta" | "hints" => {
                        self.bump()?;
                        self.skip_block()?;
                    }
                    _ => {
                        let decl = self.declaration()?;
                        match decl.expr {
                            Some(expr) => declarations.push(Declaration {
                                name: decl.name,
                                ty: decl.ty,
                                expr,
                                span: decl.span,
                            }),
                            None => inputs.push(decl.into_parameter()),
                        }
                    }
                },
                other => {
                    return Err(SyntaxError::new(
                        token.span,
                        format!("unexpected {} in task '{}'", other.describe(), name),
                    ))
                }
            }
        }

        let command = command.ok_or_else(|| {
            SyntaxError::new(span, format!("task '{}' has no command section", name))
        })?;

        Ok(Task {
            name,
            inputs,
            declarations,
            outputs,
            runtime,
            command,
            span,
        })
    }

    fn command(&mut self, span: Span) -> PResult<Command> {
        let (style, raw_parts) = self.raw_lexer()?.command_body()?;
        let mut parts = Vec::with_capacity(raw_parts.len());
        for part in raw_parts {
            parts.push(match part {
                RawPart::Text(text) => CommandPart::Text(text),
                RawPart::Marker(marker) => CommandPart::Placeholder(self.placeholder(&marker)?),
            });
        }
        Ok(Command { style, parts, span })
    }

    fn runtime_section(&mut self) -> PResult<Vec<(String, Expr)>> {
        self.expect(&TokenKind::LBrace)?;
        let mut entries = Vec::new();
        while !self.eat(&TokenKind::RBrace)? {
            let (key, _) = self.expect_ident("runtime attribute")?;
            self.expect(&TokenKind::Colon)?;
            let value = self.expr()?;
            self.eat(&TokenKind::Comma)?;
            entries.push((key, value));
        }
        Ok(entries)
    }

    fn workflow(&mut self, span: Span) -> PResult<Workflow> {
        let (name, _) = self.expect_ident("workflow name")?;
        let open = self.expect(&TokenKind::LBrace)?;

        let mut inputs = Vec::new();
        let mut body = Vec::new();
        let mut outputs = Vec::new();

        loop {
            let token = self.peek()?.clone();
            match &token.kind {
                TokenKind::RBrace => {
                    self.bump()?;
                    break;
                }
                TokenKind::Eof => {
                    return Err(SyntaxError::new(
                        open.span,
                        format!("workflow '{}' is not closed", name),
                    ))
                }
                TokenKind::Ident(keyword) if keyword == "input" => {
                    self.bump()?;
                    inputs.extend(self.input_section()?);
                }
                TokenKind::Ident(keyword) if keyword == "output" => {
                    self.bump()?;
                    outputs.extend(self.output_section()?);
                }
                TokenKind::Ident(keyword)
                    if matches!(keyword.as_str(), "meta" | "parameter_meta" | "hints") =>
                {
                    self.bump()?;
                    self.skip_block()?;
                }
                _ => match self.body_item()? {
                    BodyItem::Element(element) => body.push(element),
                    BodyItem::Input(param) => inputs.push(param),
                },
            }
        }

        Ok(Workflow {
            name,
            inputs,
            body,
            outputs,
            imports: Vec::new(),
            span,
        })
    }

    fn body_item(&mut self) -> PResult<BodyItem> {
        let token = self.peek()?.clone();
        let keyword = match &token.kind {
            TokenKind::Ident(keyword) => keyword.as_str(),
            other => {
                return Err(SyntaxError::new(
                    token.span,
                    format!("unexpected {} in workflow body", other.describe()),
                ))
            }
        };

        let element = match keyword {
            "call" => {
                self.bump()?;
                WorkflowElement::Call(self.call(token.span)?)
            }
            "scatter" => {
                self.bump()?;
                self.expect(&TokenKind::LParen)?;
                let (variable, _) = self.expect_ident("scatter variable")?;
                self.expect_keyword("in")?;
                let collection = self.expr()?;
                self.expect(&TokenKind::RParen)?;
                let body = self.block_body(token.span)?;
                WorkflowElement::Scatter(ScatterBlock {
                    variable,
                    collection,
                    body,
                    span: token.span,
                })
            }
            "if" => {
                self.bump()?;
                self.expect(&TokenKind::LParen)?;
                let guard = self.expr()?;
                self.expect(&TokenKind::RParen)?;
                let body = self.block_body(token.span)?;
                WorkflowElement::Conditional(ConditionalBlock {
                    guard,
                    body,
                    span: token.span,
                })
            }
            _ => {
                let decl = self.declaration()?;
                let Some(expr) = decl.expr else {
                    return Ok(BodyItem::Input(decl.into_parameter()));
                };
                WorkflowElement::Declaration(Declaration {
                    name: decl.name,
                    ty: decl.ty,
                    expr,
                    span: decl.span,
                })
            }
        };
        Ok(BodyItem::Element(element))
    }

    fn block_body(&mut self, span: Span) -> PResult<Vec<WorkflowElement>> {
        self.enter(span)?;
        self.expect(&TokenKind::LBrace)?;
        let mut body = Vec::new();
        while !self.eat(&TokenKind::RBrace)? {
            if self.at(&TokenKind::Eof)? {
                return Err(SyntaxError::new(span, "block is not closed"));
            }
            match self.body_item()? {
                BodyItem::Element(element) => body.push(element),
                BodyItem::Input(param) => {
                    return Err(SyntaxError::new(
                        param.span,
                        format!("declaration '{}' inside a block needs a value", param.name),
                    ))
                }
            }
        }
        self.leave();
        Ok(body)
    }

    fn call(&mut self, span: Span) -> PResult<CallStep> {
        let (mut target, _) = self.expect_ident("call target")?;
        while self.eat(&TokenKind::Dot)? {
            target.push('.');
            target.push_str(&self.expect_ident("call target")?.0);
        }

        let mut alias = None;
        if self.at_keyword("as")? {
            self.bump()?;
            alias = Some(self.expect_ident("call alias")?.0);
        }
        while self.at_keyword("after")? {
            self.bump()?;
            self.expect_ident("call name")?;
        }

        let mut inputs = Vec::new();
        if self.eat(&TokenKind::LBrace)? {
            if self.at_keyword("input")? {
                self.bump()?;
                self.expect(&TokenKind::Colon)?;
            }
            while !self.eat(&TokenKind::RBrace)? {
                let (name, _) = self.expect_ident("input name")?;
                let value = if self.eat(&TokenKind::Assign)? {
                    self.expr()?
                } else {
                    Expr::ident(&name)
                };
                inputs.push((name, value));
                self.eat(&TokenKind::Comma)?;
            }
        }

        Ok(CallStep {
            target,
            alias,
            inputs,
            span,
        })
    }
}

fn plain_string(parts: Vec<RawPart>) -> Option<String> {
    parts
        .into_iter()
        .map(|part| match part {
            RawPart::Text(text) => Some(text),
            RawPart::Marker(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::parse_document;
    use super::*;
    use crate::ir::{CommandStyle, Literal, RuntimeValue};

    const TWO_TASKS: &str = r#"
version 1.0

# matrix pipeline
workflow Pipeline {
  input {
    Array[File] samples
    Int? cpu
  }
  call BuildMatrix { input: samples = samples }
  call ScoreMatrix { input: matrix = BuildMatrix.matrix, cpu = cpu }
  output {
    File scores = ScoreMatrix.scores
  }
}

task BuildMatrix {
  input {
    Array[File] samples
  }
  command <<<
    paste ~{sep=' ' samples} > matrix.tsv
  >>>
  output {
    File matrix = "matrix.tsv"
  }
  runtime {
    docker: "ubuntu:22.04"
  }
}

task ScoreMatrix {
  input {
    File matrix
    Int? cpu
  }
  command <<<
    score --threads ~{select_first([cpu, 1])} ~{matrix} > scores.txt
  >>>
  runtime {
    cpu: select_first([cpu, 1])
    memory: "4 GiB"
    preemptible: 3
  }
  output {
    File scores = "scores.txt"
  }
}
"#;

    fn parse(src: &str) -> Document {
        parse_document(src, Path::new("test.wdl")).unwrap()
    }

    #[test]
    fn test_workflow_before_tasks() {
        let doc = parse(TWO_TASKS);
        assert_eq!(doc.version.as_deref(), Some("1.0"));
        assert_eq!(doc.tasks.len(), 2);
        let wf = doc.workflow.as_ref().unwrap();
        assert_eq!(wf.name, "Pipeline");
        assert_eq!(wf.inputs.len(), 2);
        assert_eq!(wf.calls().len(), 2);
        assert_eq!(
            wf.calls()[1].binding("matrix"),
            Some(&Expr::Ref(vec!["BuildMatrix".into(), "matrix".into()]))
        );
    }

    #[test]
    fn test_runtime_override_node() {
        let doc = parse(TWO_TASKS);
        let task = doc.task("ScoreMatrix").unwrap();
        assert_eq!(
            task.runtime.cpu,
            Some(RuntimeValue::Override {
                param: "cpu".into(),
                default: Literal::Int(1)
            })
        );
        assert_eq!(task.runtime.ignored.len(), 1);
        assert_eq!(task.runtime.ignored[0].0, "preemptible");
    }

    #[test]
    fn test_task_without_outputs_is_valid() {
        let doc = parse("version 1.0\ntask Touch {\n  command <<< touch x >>>\n}\n");
        assert!(doc.tasks[0].outputs.is_empty());
    }

    #[test]
    fn test_draft_dialect_inputs_and_brace_command() {
        let src = r#"
task Count {
  File input_file
  String prefix = "counts"
  command {
    awk '{ n++ } END { print n }' ${input_file} > ${prefix}.txt
  }
  output {
    File counts = "${prefix}.txt"
  }
}
"#;
        let doc = parse(src);
        let task = &doc.tasks[0];
        assert_eq!(task.inputs.len(), 1);
        assert_eq!(task.declarations.len(), 1);
        assert_eq!(task.command.style, CommandStyle::Braces);
        assert_eq!(task.command.placeholders().count(), 2);
        assert!(task.command.source_text().contains("awk '{ n++ } END { print n }'"));
    }

    #[test]
    fn test_struct_is_skipped_with_warning() {
        let src = "version 1.0\nstruct Sample { String id }\ntask T { command <<< true >>> }\n";
        let doc = parse(src);
        assert_eq!(doc.tasks.len(), 1);
        assert_eq!(doc.warnings.len(), 1);
        assert_eq!(doc.warnings[0].kind, DiagnosticKind::SkippedConstruct);
    }

    #[test]
    fn test_undeclared_marker_still_parses() {
        let src = "version 1.0\ntask T {\n  input { String name }\n  command <<<\n    echo ~{nmae}\n  >>>\n}\ntask U { command <<< true >>> }\n";
        let doc = parse(src);
        assert_eq!(doc.tasks.len(), 2);
        assert_eq!(doc.tasks[0].command.placeholders().next().unwrap().raw, "~{nmae}");
    }

    #[test]
    fn test_missing_command_is_parse_error() {
        let err = parse_document("task T { input { Int x } }", Path::new("t.wdl")).unwrap_err();
        assert!(err.to_string().contains("has no command section"));
    }

    #[test]
    fn test_two_workflows_rejected() {
        let src = "workflow A { }\nworkflow B { }\n";
        let err = parse_document(src, Path::new("t.wdl")).unwrap_err();
        assert!(err.to_string().contains("second workflow 'B'"));
    }

    #[test]
    fn test_map_type_rejected() {
        let src = "task T { input { Map[String, String] m } command <<< true >>> }";
        let err = parse_document(src, Path::new("t.wdl")).unwrap_err();
        assert!(err.to_string().contains("unsupported type 'Map'"));
    }

    #[test]
    fn test_nested_scatter_and_conditional() {
        let src = r#"
version 1.0
workflow W {
  input {
    Array[Array[File]] groups
    Boolean run_qc = true
  }
  scatter (group in groups) {
    scatter (f in group) {
      if (run_qc) {
        call QC { input: f = f }
      }
    }
  }
}
task QC { input { File f } command <<< qc ~{f} >>> }
"#;
        let doc = parse(src);
        let wf = doc.workflow.unwrap();
        let WorkflowElement::Scatter(outer) = &wf.body[0] else {
            panic!("expected scatter");
        };
        let WorkflowElement::Scatter(inner) = &outer.body[0] else {
            panic!("expected nested scatter");
        };
        assert_eq!(inner.variable, "f");
        assert!(matches!(inner.body[0], WorkflowElement::Conditional(_)));
    }

    #[test]
    fn test_imports_with_alias() {
        let src = "version 1.0\nimport \"lib/tasks.wdl\" as lib\nimport \"qc.wdl\"\nworkflow W { call lib.Align as A }\n";
        let doc = parse(src);
        assert_eq!(doc.imports.len(), 2);
        assert_eq!(doc.imports[0].namespace(), "lib");
        assert_eq!(doc.imports[1].namespace(), "qc");
        let wf = doc.workflow.unwrap();
        assert_eq!(wf.calls()[0].target, "lib.Align");
        assert_eq!(wf.calls()[0].name(), "A");
    }
}
