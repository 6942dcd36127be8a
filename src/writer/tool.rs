//! Task → CommandLineTool

use std::collections::BTreeMap;
use std::path::Path;

use serde_yaml::{Mapping, Number, Value};
use tracing::{debug, warn};

use super::{
    container_param, cwl_default, cwl_type, insert, mapping, string, to_yaml, ContainerInput,
    CwlDocument, CWL_VERSION,
};
use crate::check::check_task;
use crate::error::{ConvertError, Diagnostic, DiagnosticKind, Location, Result};
use crate::ir::{Declaration, Expr, Literal, Quantity, RuntimeValue, SizeUnit, Task, WdlType};
use crate::translate::{is_param_ref, js_literal, Binding, ExprTranslator, RefResolver};

pub const SCRIPT_NAME: &str = "script.bash";

/// Names resolve to `inputs.<name>`; private declarations and outputs inline
struct ToolScope<'t> {
    task: &'t Task,
}

impl RefResolver for ToolScope<'_> {
    fn resolve(&self, path: &[String]) -> Option<Binding<'_>> {
        let [name] = path else { return None };
        if let Some(param) = self.task.input(name) {
            let js = format!("inputs.{}", name);
            let ty = param.ty.clone();
            return Some(match &param.default {
                Some(default) if default.literal_value().is_none() => {
                    Binding::Fallback { js, default, ty }
                }
                _ => Binding::Value { js, ty },
            });
        }
        if let Some(decl) = self.task.declaration(name) {
            return Some(Binding::Inline(&decl.expr));
        }
        self.task.output(name).map(|o| Binding::Inline(&o.expr))
    }
}

/// Streams captured by `stdout()`/`stderr()` outputs
#[derive(Default)]
struct Streams {
    stdout: bool,
    stderr: bool,
}

struct ToolWriter<'t> {
    task: &'t Task,
    file: &'t Path,
    scope: ToolScope<'t>,
    needs_js: bool,
    streams: Streams,
}

/// Emit the CommandLineTool document for `task`
pub fn write_tool(task: &Task, file: &Path) -> Result<CwlDocument> {
    check_task(task, file)?;
    let mut writer = ToolWriter {
        task,
        file,
        scope: ToolScope { task },
        needs_js: false,
        streams: Streams::default(),
    };
    let warnings = writer.check_runtime()?;
    let document = writer.document()?;
    debug!(task = %task.name, "CommandLineTool written");

    Ok(CwlDocument {
        name: task.name.clone(),
        yaml: to_yaml(&task.name, &document)?,
        warnings,
    })
}

impl<'t> ToolWriter<'t> {
    fn translator(&self, context: String, location: Location) -> ExprTranslator<'_> {
        ExprTranslator::new(&self.scope, location, context)
    }

    fn location(&self) -> Location {
        Location::new(self.file, self.task.span)
    }

    fn stdout_name(&self) -> String {
        format!("{}.stdout", self.task.name)
    }

    fn stderr_name(&self) -> String {
        format!("{}.stderr", self.task.name)
    }

    /// Unsupported runtime values fail the tool; ignored keys become warnings
    fn check_runtime(&self) -> Result<Vec<Diagnostic>> {
        let runtime = &self.task.runtime;
        if let Some((key, expr)) = runtime.unsupported.first() {
            return Err(ConvertError::UnsupportedExpression {
                location: self.location(),
                kind: expr.kind().to_string(),
                expr: expr.to_string(),
                context: format!("runtime.{} of task '{}'", key, self.task.name),
            });
        }

        let mut warnings = Vec::new();
        for (key, _) in &runtime.ignored {
            warn!(task = %self.task.name, key = %key, "Runtime attribute has no CWL counterpart");
            warnings.push(Diagnostic::warning(
                DiagnosticKind::IgnoredRuntime,
                self.location(),
                format!(
                    "runtime attribute '{}' of task '{}' has no CWL counterpart and was ignored",
                    key, self.task.name
                ),
            ));
        }
        Ok(warnings)
    }

    fn document(&mut self) -> Result<Value> {
        let container = container_param(self.task);

        let script = {
            let tr = self.translator(
                format!("command of task '{}'", self.task.name),
                Location::new(self.file, self.task.command.span),
            );
            tr.command(&self.task.command.parts)?
        };
        self.needs_js |= script.needs_js;

        let resources = self.resources()?;
        let hints = self.hints(container.as_ref())?;
        let inputs = self.inputs(container.as_ref());
        let outputs = self.outputs()?;

        let mut requirements = Vec::new();
        if self.needs_js {
            requirements.push(mapping([("class", string("InlineJavascriptRequirement"))]));
        }
        requirements.push(mapping([
            ("class", string("InitialWorkDirRequirement")),
            (
                "listing",
                Value::Sequence(vec![mapping([
                    ("entryname", string(SCRIPT_NAME)),
                    ("entry", string(script.text)),
                ])]),
            ),
        ]));
        if let Some(resources) = resources {
            requirements.push(resources);
        }

        let mut doc = Mapping::new();
        insert(&mut doc, "cwlVersion", string(CWL_VERSION));
        insert(&mut doc, "class", string("CommandLineTool"));
        insert(&mut doc, "id", string(self.task.name.clone()));
        insert(&mut doc, "requirements", Value::Sequence(requirements));
        if !hints.is_empty() {
            insert(&mut doc, "hints", Value::Sequence(hints));
        }
        insert(
            &mut doc,
            "baseCommand",
            Value::Sequence(vec![string("bash"), string(SCRIPT_NAME)]),
        );
        if self.streams.stdout {
            insert(&mut doc, "stdout", string(self.stdout_name()));
        }
        if self.streams.stderr {
            insert(&mut doc, "stderr", string(self.stderr_name()));
        }
        insert(&mut doc, "inputs", inputs);
        insert(&mut doc, "outputs", outputs);
        Ok(Value::Mapping(doc))
    }

    fn hints(&mut self, container: Option<&ContainerInput>) -> Result<Vec<Value>> {
        let task = self.task;
        let Some(value) = &task.runtime.container else {
            return Ok(Vec::new());
        };

        let pull = match (container, value) {
            (Some(input), _) => string(format!("$(inputs.{})", input.param)),
            (None, RuntimeValue::Fixed(expr)) => {
                let tr = self.translator(
                    format!("runtime.docker of task '{}'", task.name),
                    self.location(),
                );
                let rendered = tr.template(expr)?;
                self.needs_js |= rendered.needs_js;
                string(rendered.text)
            }
            (None, RuntimeValue::Override { default, .. }) => match default {
                Literal::String(image) => string(image.clone()),
                other => string(other.to_string()),
            },
        };

        Ok(vec![mapping([
            ("class", string("DockerRequirement")),
            ("dockerPull", pull),
        ])])
    }

    fn resources(&mut self) -> Result<Option<Value>> {
        let task = self.task;
        let runtime = &task.runtime;
        if runtime.cpu.is_none() && runtime.memory.is_none() && runtime.disk.is_none() {
            return Ok(None);
        }

        let mut requirement = Mapping::new();
        insert(&mut requirement, "class", string("ResourceRequirement"));
        if let Some(cpu) = &runtime.cpu {
            let value = self.amount("cpu", cpu, None)?;
            insert(&mut requirement, "coresMin", value);
        }
        if let Some(memory) = &runtime.memory {
            let value = self.quantity("memory", memory)?;
            insert(&mut requirement, "ramMin", value);
        }
        if let Some(disk) = &runtime.disk {
            let value = self.quantity("disks", disk)?;
            insert(&mut requirement, "outdirMin", value);
        }
        Ok(Some(Value::Mapping(requirement)))
    }

    fn quantity(&mut self, key: &str, quantity: &Quantity) -> Result<Value> {
        if let RuntimeValue::Fixed(_) = quantity.amount {
            if let Some(mib) = quantity.resolve_mib(&BTreeMap::new()) {
                return Ok(Value::Number(Number::from(mib)));
            }
        }
        if self.is_size_text(key, &quantity.amount)? {
            let code = self.value_code(key, &quantity.amount)?;
            self.needs_js = true;
            return Ok(string(format!("$({})", size_js(&code, quantity.unit))));
        }
        self.amount(key, &quantity.amount, Some(quantity.unit.mib_factor()))
    }

    /// The value is text such as `"8 GiB"` rather than a bare number
    fn is_size_text(&self, key: &str, value: &RuntimeValue) -> Result<bool> {
        let is_string = |ty: &WdlType| *ty.required() == WdlType::String;
        Ok(match value {
            RuntimeValue::Override {
                default: Literal::String(_),
                ..
            } => true,
            RuntimeValue::Override { param, .. } => {
                self.task.input(param).is_some_and(|p| is_string(&p.ty))
            }
            RuntimeValue::Fixed(expr) => {
                let tr = self.translator(
                    format!("runtime.{} of task '{}'", key, self.task.name),
                    self.location(),
                );
                tr.js(expr)?.ty.as_ref().is_some_and(is_string)
            }
        })
    }

    /// JavaScript for a runtime value, without the `$()` wrapper
    fn value_code(&self, key: &str, value: &RuntimeValue) -> Result<String> {
        let tr = self.translator(
            format!("runtime.{} of task '{}'", key, self.task.name),
            self.location(),
        );
        Ok(match value {
            RuntimeValue::Override { param, default } => {
                let param = tr.js(&Expr::ident(param))?.code;
                format!("{0} != null ? {0} : {1}", param, js_literal(default))
            }
            RuntimeValue::Fixed(expr) => tr.js(expr)?.code,
        })
    }

    /// A runtime amount, scaled to MiB when `factor` is given
    fn amount(&mut self, key: &str, value: &RuntimeValue, factor: Option<f64>) -> Result<Value> {
        if let (None, RuntimeValue::Fixed(expr)) = (factor, value) {
            if let Some(lit) = expr.literal_value() {
                return match (&lit, lit.as_f64()) {
                    (Literal::Int(i), _) => Ok(Value::Number(Number::from(*i))),
                    (_, Some(x)) => Ok(Value::Number(Number::from(x))),
                    (other, None) => Err(ConvertError::UnsupportedExpression {
                        location: self.location(),
                        kind: "literal".to_string(),
                        expr: other.to_string(),
                        context: format!("runtime.{} of task '{}'", key, self.task.name),
                    }),
                };
            }
        }

        let code = self.value_code(key, value)?;
        let bare = matches!(value, RuntimeValue::Fixed(_)) && is_param_ref(&code);

        let text = match factor {
            None => format!("$({})", code),
            Some(f) if f == 1.0 => format!("$(Math.ceil({}))", code),
            Some(f) => format!("$(Math.ceil(({}) * {}))", code, f),
        };
        self.needs_js |= !(bare && factor.is_none());
        Ok(string(text))
    }

    fn inputs(&self, container: Option<&ContainerInput>) -> Value {
        let image = container.and_then(|c| Some((c.param.as_str(), c.image.as_deref()?)));
        let mut inputs = Mapping::new();
        for param in &self.task.inputs {
            let mut entry = Mapping::new();
            if let Some((_, image)) = image.filter(|(name, _)| *name == param.name) {
                insert(&mut entry, "type", cwl_type(&param.ty));
                insert(&mut entry, "default", string(image));
                insert(&mut inputs, param.name.clone(), Value::Mapping(entry));
                continue;
            }
            match param.default.as_ref().map(Expr::literal_value) {
                // a computed default is applied where the value is used
                Some(None) => {
                    insert(&mut entry, "type", cwl_type(&WdlType::optional(param.ty.clone())));
                }
                Some(Some(lit)) if lit != Literal::None => {
                    insert(&mut entry, "type", cwl_type(&param.ty));
                    insert(&mut entry, "default", cwl_default(&lit, &param.ty));
                }
                _ => insert(&mut entry, "type", cwl_type(&param.ty)),
            }
            insert(&mut inputs, param.name.clone(), Value::Mapping(entry));
        }

        if let Some((param, image)) = image.filter(|(name, _)| self.task.input(name).is_none()) {
            insert(
                &mut inputs,
                param.to_string(),
                mapping([("type", string("string")), ("default", string(image))]),
            );
        }
        Value::Mapping(inputs)
    }

    fn outputs(&mut self) -> Result<Value> {
        let task = self.task;
        let mut outputs = Mapping::new();
        for output in &task.outputs {
            let entry = self.output(output)?;
            insert(&mut outputs, output.name.clone(), entry);
        }
        Ok(Value::Mapping(outputs))
    }

    fn output(&mut self, output: &Declaration) -> Result<Value> {
        let context = format!("output '{}' of task '{}'", output.name, self.task.name);
        let location = Location::new(self.file, output.span);
        let ty = cwl_type(&output.ty);

        match &output.expr {
            Expr::Apply { func, args } if args.is_empty() && func == "stdout" => {
                self.streams.stdout = true;
                return Ok(mapping([("type", string("stdout"))]));
            }
            Expr::Apply { func, args } if args.is_empty() && func == "stderr" => {
                self.streams.stderr = true;
                return Ok(mapping([("type", string("stderr"))]));
            }
            Expr::Apply { func, args } if func == "glob" && args.len() == 1 => {
                let glob = self.glob(&args[0], &context, location)?;
                return Ok(mapping([
                    ("type", ty),
                    ("outputBinding", mapping([("glob", glob)])),
                ]));
            }
            Expr::Apply { func, args } if args.len() == 1 => {
                if let Some(eval) = read_eval(func) {
                    let glob = self.glob(&args[0], &context, location)?;
                    self.needs_js = true;
                    return Ok(mapping([
                        ("type", ty),
                        (
                            "outputBinding",
                            mapping([
                                ("glob", glob),
                                ("loadContents", Value::Bool(true)),
                                ("outputEval", string(eval)),
                            ]),
                        ),
                    ]));
                }
            }
            _ => {}
        }

        let is_file = output.ty.is_file() || output.ty.item().is_some_and(WdlType::is_file);
        let tr = self.translator(context, location);
        let binding = if is_file {
            let rendered = tr.template(&output.expr)?;
            self.needs_js |= rendered.needs_js;
            mapping([("glob", string(rendered.text))])
        } else {
            let rendered = tr.value(&output.expr)?;
            self.needs_js |= rendered.needs_js;
            mapping([("outputEval", string(rendered.text))])
        };
        Ok(mapping([("type", ty), ("outputBinding", binding)]))
    }

    /// Glob pattern of a file argument; `stdout()`/`stderr()` name the capture file
    fn glob(&mut self, arg: &Expr, context: &str, location: Location) -> Result<Value> {
        if let Expr::Apply { func, args } = arg {
            if args.is_empty() && func == "stdout" {
                self.streams.stdout = true;
                return Ok(string(self.stdout_name()));
            }
            if args.is_empty() && func == "stderr" {
                self.streams.stderr = true;
                return Ok(string(self.stderr_name()));
            }
        }
        let tr = self.translator(context.to_string(), location);
        let rendered = tr.template(arg)?;
        self.needs_js |= rendered.needs_js;
        Ok(string(rendered.text))
    }
}

/// Bytes per unit suffix of WDL size text
const SIZE_UNITS_JS: &str = "{\"B\": 1, \"K\": 1e3, \"KB\": 1e3, \"M\": 1e6, \"MB\": 1e6, \"G\": 1e9, \"GB\": 1e9, \"T\": 1e12, \"TB\": 1e12, \"Ki\": 1024, \"KiB\": 1024, \"Mi\": 1048576, \"MiB\": 1048576, \"Gi\": 1073741824, \"GiB\": 1073741824, \"Ti\": 1099511627776, \"TiB\": 1099511627776}";

/// Whole MiB of size text computed at run time; `unit` applies to a bare number
fn size_js(code: &str, unit: SizeUnit) -> String {
    format!(
        "Math.ceil((function(v) {{ var m = /^\\s*([0-9.]+)\\s*([A-Za-z]*)\\s*$/.exec(String(v)); var u = {}; return parseFloat(m[1]) * (m[2] ? u[m[2]] : {}); }})({}) / 1048576)",
        SIZE_UNITS_JS,
        unit.bytes(),
        code
    )
}

/// `outputEval` for `read_*` on the first globbed file
fn read_eval(func: &str) -> Option<&'static str> {
    match func {
        "read_string" => Some("$(self[0].contents.replace(/\\n$/, \"\"))"),
        "read_int" => Some("$(parseInt(self[0].contents))"),
        "read_float" => Some("$(parseFloat(self[0].contents))"),
        "read_boolean" => Some("$(self[0].contents.trim() == \"true\")"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_document;

    const TASKS: &str = r#"
version 1.0

task Count {
  input {
    File reads
    String? tag
    Int? cpu
    String sample = "s1"
    String prefix = sample
  }
  String out_name = "~{prefix}.counts"
  command <<<
    echo ${HOME}
    count ~{reads} > ~{out_name}
  >>>
  runtime {
    docker: "ubuntu:22.04"
    cpu: select_first([cpu, 1])
    memory: "4 GiB"
    disks: "local-disk 10 HDD"
    maxRetries: 2
  }
  output {
    File counts = out_name
    Int total = read_int(stdout())
    Array[File] parts = glob("part-*")
    String label = prefix
  }
}

task Bad {
  command <<< true >>>
  runtime { memory: "lots" }
}
"#;

    fn tool(name: &str) -> Result<CwlDocument> {
        let doc = parse_document(TASKS, Path::new("count.wdl")).unwrap();
        write_tool(doc.task(name).unwrap(), Path::new("count.wdl"))
    }

    fn yaml(name: &str) -> Value {
        serde_yaml::from_str(&tool(name).unwrap().yaml).unwrap()
    }

    fn requirement<'a>(doc: &'a Value, class: &str) -> Option<&'a Value> {
        doc["requirements"]
            .as_sequence()?
            .iter()
            .find(|r| r["class"].as_str() == Some(class))
    }

    #[test]
    fn test_header_and_base_command() {
        let doc = yaml("Count");
        assert_eq!(doc["cwlVersion"].as_str(), Some("v1.2"));
        assert_eq!(doc["class"].as_str(), Some("CommandLineTool"));
        assert_eq!(doc["baseCommand"][1].as_str(), Some(SCRIPT_NAME));
        assert_eq!(doc["stdout"].as_str(), Some("Count.stdout"));
    }

    #[test]
    fn test_every_output_is_emitted_with_its_type() {
        let doc = yaml("Count");
        let outputs = doc["outputs"].as_mapping().unwrap();
        assert_eq!(outputs.len(), 4);
        assert_eq!(doc["outputs"]["counts"]["type"].as_str(), Some("File"));
        assert_eq!(
            doc["outputs"]["counts"]["outputBinding"]["glob"].as_str(),
            Some("$((inputs.prefix != null ? inputs.prefix : inputs.sample)).counts")
        );
        assert_eq!(doc["outputs"]["total"]["type"].as_str(), Some("int"));
        assert_eq!(
            doc["outputs"]["total"]["outputBinding"]["glob"].as_str(),
            Some("Count.stdout")
        );
        assert_eq!(doc["outputs"]["parts"]["type"].as_str(), Some("File[]"));
        assert_eq!(
            doc["outputs"]["label"]["outputBinding"]["outputEval"].as_str(),
            Some("$((inputs.prefix != null ? inputs.prefix : inputs.sample))")
        );
    }

    #[test]
    fn test_input_defaults() {
        let doc = yaml("Count");
        assert_eq!(doc["inputs"]["tag"]["type"].as_str(), Some("string?"));
        assert!(doc["inputs"]["tag"].get("default").is_none());
        assert_eq!(doc["inputs"]["sample"]["default"].as_str(), Some("s1"));
        assert_eq!(doc["inputs"]["prefix"]["type"].as_str(), Some("string?"));
        assert!(doc["inputs"]["prefix"].get("default").is_none());
    }

    #[test]
    fn test_script_keeps_shell_text() {
        let doc = yaml("Count");
        let listing = &requirement(&doc, "InitialWorkDirRequirement").unwrap()["listing"][0];
        assert_eq!(listing["entryname"].as_str(), Some(SCRIPT_NAME));
        let entry = listing["entry"].as_str().unwrap();
        assert!(entry.contains("echo \\${HOME}"));
        assert!(entry.contains("count $(inputs.reads.path) > "));
        assert!(entry.contains("(inputs.prefix != null ? inputs.prefix : inputs.sample)"));
    }

    #[test]
    fn test_resources_and_override() {
        let doc = yaml("Count");
        let res = requirement(&doc, "ResourceRequirement").unwrap();
        assert_eq!(
            res["coresMin"].as_str(),
            Some("$(inputs.cpu != null ? inputs.cpu : 1)")
        );
        assert_eq!(res["ramMin"].as_u64(), Some(4096));
        assert_eq!(res["outdirMin"].as_u64(), Some(10240));
        assert!(requirement(&doc, "InlineJavascriptRequirement").is_some());
    }

    #[test]
    fn test_literal_image_becomes_defaulted_input() {
        let doc = yaml("Count");
        assert_eq!(doc["inputs"]["docker"]["default"].as_str(), Some("ubuntu:22.04"));
        assert_eq!(doc["hints"][0]["class"].as_str(), Some("DockerRequirement"));
        assert_eq!(doc["hints"][0]["dockerPull"].as_str(), Some("$(inputs.docker)"));
    }

    #[test]
    fn test_ignored_runtime_key_is_warned() {
        let tool = tool("Count").unwrap();
        assert_eq!(tool.warnings.len(), 1);
        assert_eq!(tool.warnings[0].kind, DiagnosticKind::IgnoredRuntime);
        assert!(tool.warnings[0].message.contains("maxRetries"));
    }

    #[test]
    fn test_unstructured_memory_fails() {
        let err = tool("Bad").unwrap_err();
        assert_eq!(err.kind(), DiagnosticKind::UnsupportedExpression);
        assert!(err.to_string().contains("runtime.memory of task 'Bad'"));
    }

    #[test]
    fn test_plain_tool_needs_no_javascript() {
        let src = "version 1.0\ntask Echo { input { String msg } command <<< echo ~{msg} >>> }\n";
        let doc = parse_document(src, Path::new("e.wdl")).unwrap();
        let tool = write_tool(&doc.tasks[0], Path::new("e.wdl")).unwrap();
        let doc: Value = serde_yaml::from_str(&tool.yaml).unwrap();
        assert!(requirement(&doc, "InlineJavascriptRequirement").is_none());
        assert!(doc.get("hints").is_none());
        assert_eq!(doc["outputs"].as_mapping().map(|m| m.len()), Some(0));
    }

    const OVERRIDES: &str = r#"
version 1.0

task Align {
  input {
    File reads
    String? docker_override
    String? mem
    Int? disk_gb
  }
  command <<<
    align ~{reads}
  >>>
  runtime {
    docker: select_first([docker_override, "ubuntu:22.04"])
    memory: select_first([mem, "4 GiB"])
    disks: select_first([disk_gb, 20])
  }
}
"#;

    fn override_tool() -> Value {
        let doc = parse_document(OVERRIDES, Path::new("align.wdl")).unwrap();
        let tool = write_tool(&doc.tasks[0], Path::new("align.wdl")).unwrap();
        serde_yaml::from_str(&tool.yaml).unwrap()
    }

    #[test]
    fn test_container_override_keeps_fallback_image() {
        let doc = override_tool();
        assert_eq!(
            doc["hints"][0]["dockerPull"].as_str(),
            Some("$(inputs.docker_override)")
        );
        assert_eq!(doc["inputs"]["docker_override"]["type"].as_str(), Some("string?"));
        assert_eq!(
            doc["inputs"]["docker_override"]["default"].as_str(),
            Some("ubuntu:22.04")
        );
        assert!(doc["inputs"].get("docker").is_none());
    }

    #[test]
    fn test_memory_override_with_size_text_is_parsed_at_run_time() {
        let doc = override_tool();
        let res = requirement(&doc, "ResourceRequirement").unwrap();
        let ram = res["ramMin"].as_str().unwrap();
        assert!(ram.starts_with("$(Math.ceil((function(v)"), "{}", ram);
        assert!(ram.contains("(inputs.mem != null ? inputs.mem : \"4 GiB\")"), "{}", ram);
        assert!(ram.contains("\"GiB\": 1073741824"));
        assert!(ram.ends_with("/ 1048576))"));
        assert!(requirement(&doc, "InlineJavascriptRequirement").is_some());
    }

    #[test]
    fn test_numeric_disk_override_scales_gib() {
        let doc = override_tool();
        let res = requirement(&doc, "ResourceRequirement").unwrap();
        assert_eq!(
            res["outdirMin"].as_str(),
            Some("$(Math.ceil((inputs.disk_gb != null ? inputs.disk_gb : 20) * 1024))")
        );
    }

    #[test]
    fn test_memory_override_without_size_text_fails() {
        let src = OVERRIDES.replace("\"4 GiB\"", "\"plenty\"");
        let doc = parse_document(&src, Path::new("align.wdl")).unwrap();
        let err = write_tool(&doc.tasks[0], Path::new("align.wdl")).unwrap_err();
        assert_eq!(err.kind(), DiagnosticKind::UnsupportedExpression);
        assert!(err.to_string().contains("runtime.memory of task 'Align'"));
    }

    #[test]
    fn test_undeclared_marker_fails_tool() {
        let src = "version 1.0\ntask Typo {\n  input { File reads }\n  command <<<\n    wc -l ~{raeds}\n  >>>\n}\n";
        let doc = parse_document(src, Path::new("typo.wdl")).unwrap();
        let err = write_tool(&doc.tasks[0], Path::new("typo.wdl")).unwrap_err();
        assert_eq!(err.kind(), DiagnosticKind::UnresolvedReference);
        assert!(err.to_string().contains("'raeds'"));
        assert!(err.to_string().contains("~{raeds}"));
    }
}
