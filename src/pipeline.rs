//! Submission scripts as an ordered list of stages
//!
//! The outer submission shell is a bash script that calls `sbatch` once per stage, capturing each
//! scheduler id in a variable (`jid0=($(sbatch ...))`), chaining stages with
//! `--dependency=afterok:${jid0[-1]}` and appending every id to the task ledger. A [`Pipeline`]
//! holds that script as typed lines so a stage can be taken out of the scheduler graph and run on
//! the submitting host instead, without string surgery on the rendered text.
//!
//! Lines that aren't stage submissions or ledger records are kept verbatim, so parsing and
//! rendering a script leaves them untouched. Arguments are split on whitespace; quoted arguments
//! containing spaces aren't supported.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use log::debug;

pub use crate::pipeline::generate::{generate, GenerateError, GeneratedRun, GeneratorSettings};
pub use crate::pipeline::prestage::{run_synchronously, PreStageError};

/// Render a run configuration into a working directory
pub mod generate;
/// Run a detached stage on the submitting host
pub mod prestage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    lines: Vec<Line>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Verbatim(String),
    Submit(Stage),
    /// `echo "<label> ${var[-1]}" >> <ledger>`
    Ledger { var: String, text: String },
}

/// One `sbatch` call of the outer submission shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Bash array variable holding the scheduler id
    pub var: String,
    pub args: Vec<SbatchArg>,
    /// Stage script, relative to the working directory
    pub script: String,
    /// Leading whitespace of the parsed line, kept when the stage is rendered again
    indent: String,
    /// Text the stage was parsed from, dropped as soon as the stage is modified
    raw: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SbatchArg {
    Plain(String),
    /// `--dependency=afterok:${a[-1]}:${b[-1]}`, holding the variable names
    AfterOk(Vec<String>),
}

const SUBMIT_MARKER: &str = "=($(sbatch ";
const AFTEROK_PREFIX: &str = "--dependency=afterok:";

impl Stage {
    pub fn new(var: &str, args: Vec<SbatchArg>, script: &str) -> Stage {
        Stage { var: var.to_string(), args, script: script.to_string(), indent: String::new(), raw: None }
    }

    fn option(&self, prefix: &str) -> Option<&str> {
        self.args.iter().find_map(|arg| match arg {
            SbatchArg::Plain(arg) => arg.strip_prefix(prefix),
            SbatchArg::AfterOk(_) => None,
        })
    }

    pub fn job_name(&self) -> Option<&str> {
        self.option("--job-name=")
    }

    /// Job name, or the script's file stem when the stage has none
    pub fn name(&self) -> &str {
        self.job_name().unwrap_or_else(|| {
            Path::new(&self.script)
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or(&self.script)
        })
    }

    pub fn output(&self) -> Option<&str> {
        self.option("--output=")
    }

    pub fn error(&self) -> Option<&str> {
        self.option("--error=")
    }

    pub fn dependencies(&self) -> Vec<&str> {
        self.args
            .iter()
            .flat_map(|arg| match arg {
                SbatchArg::AfterOk(vars) => vars.iter().map(String::as_str).collect::<Vec<&str>>(),
                SbatchArg::Plain(_) => Vec::new(),
            })
            .collect()
    }

    /// Data generation stages are named `<label>_data<N>` (or mention generation)
    pub fn is_data_generation(&self) -> bool {
        let name = self.name();
        let numbered = name
            .rsplit_once("_data")
            .is_some_and(|(_, idx)| !idx.is_empty() && idx.chars().all(|c| c.is_ascii_digit()));
        numbered || name.contains("generation")
    }

    /// Remove `var` from this stage's afterok dependencies, returning whether it was there
    fn drop_dependency(&mut self, var: &str) -> bool {
        let mut dropped = false;
        for arg in self.args.iter_mut() {
            if let SbatchArg::AfterOk(vars) = arg {
                let before = vars.len();
                vars.retain(|dependency| dependency != var);
                dropped |= vars.len() != before;
            }
        }
        if dropped {
            self.args.retain(|arg| !matches!(arg, SbatchArg::AfterOk(vars) if vars.is_empty()));
            self.raw = None;
        }
        dropped
    }

    fn parse(line: &str) -> Option<Stage> {
        let trimmed = line.trim();
        let (var, rest) = trimmed.split_once(SUBMIT_MARKER)?;
        if !is_identifier(var) {
            return None;
        }
        let inner = rest.strip_suffix("))")?;

        let mut tokens: Vec<&str> = inner.split_whitespace().collect();
        let script = tokens.pop()?;
        let args = tokens
            .into_iter()
            .map(|token| match token.strip_prefix(AFTEROK_PREFIX) {
                Some(ids) => match parse_afterok(ids) {
                    Some(vars) => SbatchArg::AfterOk(vars),
                    None => SbatchArg::Plain(token.to_string()),
                },
                None => SbatchArg::Plain(token.to_string()),
            })
            .collect();

        let indent = &line[..line.len() - line.trim_start().len()];
        Some(Stage {
            var: var.to_string(),
            args,
            script: script.to_string(),
            indent: indent.to_string(),
            raw: Some(line.to_string()),
        })
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(raw) = &self.raw {
            return f.write_str(raw);
        }
        write!(f, "{}{}=($(sbatch", self.indent, self.var)?;
        for arg in &self.args {
            match arg {
                SbatchArg::Plain(arg) => write!(f, " {arg}")?,
                SbatchArg::AfterOk(vars) => {
                    let ids: Vec<String> = vars.iter().map(|var| format!("${{{var}[-1]}}")).collect();
                    write!(f, " {AFTEROK_PREFIX}{}", ids.join(":"))?
                }
            }
        }
        write!(f, " {}))", self.script)
    }
}

impl Line {
    fn parse(line: &str) -> Line {
        if let Some(stage) = Stage::parse(line) {
            return Line::Submit(stage);
        }
        if let Some(var) = ledger_var(line) {
            return Line::Ledger { var, text: line.to_string() };
        }
        Line::Verbatim(line.to_string())
    }

    /// Ledger records and other `echo` lines
    fn is_informational(&self) -> bool {
        match self {
            Line::Ledger { .. } => true,
            Line::Verbatim(text) => text.trim_start().starts_with("echo"),
            Line::Submit(_) => false,
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, Line::Verbatim(text) if text.trim().is_empty())
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Line::Verbatim(text) => f.write_str(text),
            Line::Submit(stage) => write!(f, "{stage}"),
            Line::Ledger { text, .. } => f.write_str(text),
        }
    }
}

impl Pipeline {
    pub fn new() -> Pipeline {
        Pipeline { lines: Vec::new() }
    }

    pub fn parse(script: &str) -> Pipeline {
        Pipeline { lines: script.lines().map(Line::parse).collect() }
    }

    pub fn push_verbatim(&mut self, text: &str) {
        self.lines.extend(text.lines().map(|line| Line::Verbatim(line.to_string())));
    }

    pub fn push_blank(&mut self) {
        self.lines.push(Line::Verbatim(String::new()));
    }

    /// Append a stage followed by its ledger record
    pub fn push_stage(&mut self, stage: Stage, ledger: &str) {
        let var = stage.var.clone();
        let text = format!("echo \"{} ${{{var}[-1]}}\" >> {ledger}", stage.name());
        self.lines.push(Line::Submit(stage));
        self.lines.push(Line::Ledger { var, text });
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.lines.iter().filter_map(|line| match line {
            Line::Submit(stage) => Some(stage),
            _ => None,
        })
    }

    /// Take a stage out of the scheduler graph
    ///
    /// Removes the stage's submission line and the informational line that follows it, then
    /// strips the stage from the afterok dependencies of every later stage. The caller becomes
    /// responsible for running the returned stage before the pipeline is submitted.
    pub fn detach(&mut self, var: &str) -> Option<Stage> {
        let (idx, stage) = self.lines.iter().enumerate().find_map(|(idx, line)| match line {
            Line::Submit(stage) if stage.var == var => Some((idx, stage.clone())),
            _ => None,
        })?;
        self.lines.remove(idx);

        if let Some(offset) = self.lines[idx..].iter().position(|line| !line.is_blank()) {
            if self.lines[idx + offset].is_informational() {
                self.lines.remove(idx + offset);
            }
        }

        let mut dependents = 0;
        for line in self.lines[idx..].iter_mut() {
            if let Line::Submit(dependent) = line {
                if dependent.drop_dependency(var) {
                    dependents += 1;
                }
            }
        }
        debug!("Detached stage {} ({var}), stripped from {dependents} dependent stage(s)", stage.name());

        Some(stage)
    }

    /// Detach the first data generation stage, if there is one
    pub fn detach_data_generation(&mut self) -> Option<Stage> {
        let var = self.stages().find(|stage| stage.is_data_generation())?.var.clone();
        self.detach(&var)
    }

    pub fn write(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.to_string())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline::new()
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

fn is_identifier(var: &str) -> bool {
    let mut chars = var.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `${jid0[-1]}:${jid1[-1]}` -> `["jid0", "jid1"]`
fn parse_afterok(ids: &str) -> Option<Vec<String>> {
    ids.split(':')
        .map(|id| {
            let var = id.strip_prefix("${")?.strip_suffix("[-1]}")?;
            is_identifier(var).then(|| var.to_string())
        })
        .collect()
}

/// Variable recorded by an `echo ... ${var[-1]} >> ...` line
fn ledger_var(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    if !trimmed.starts_with("echo ") || !trimmed.contains(">>") {
        return None;
    }
    let start = trimmed.find("${")? + 2;
    let end = start + trimmed[start..].find("[-1]}")?;
    let var = &trimmed[start..end];
    is_identifier(var).then(|| var.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = "\
#!/bin/bash
#SBATCH --job-name=GW150914_master

jid0=($(sbatch --mem=8G --job-name=GW150914_data0 --output=log_data_generation/GW150914_data0.out --error=log_data_generation/GW150914_data0.err submit/GW150914_data0.sh))
echo \"GW150914_data0 ${jid0[-1]}\" >> submit/slurm_ids

jid1=($(sbatch --mem=4G --job-name=GW150914_data0_0_analysis_H1L1_dynesty --dependency=afterok:${jid0[-1]} --output=log_data_analysis/analysis.out submit/GW150914_data0_0_analysis_H1L1_dynesty.sh))
echo \"GW150914_data0_0_analysis_H1L1_dynesty ${jid1[-1]}\" >> submit/slurm_ids

jid2=($(sbatch --job-name=GW150914_final_result --dependency=afterok:${jid1[-1]} submit/GW150914_final_result.sh))
echo \"GW150914_final_result ${jid2[-1]}\" >> submit/slurm_ids
";

    #[test]
    fn test_parse_and_render_is_lossless() {
        let pipeline = Pipeline::parse(SCRIPT);
        assert_eq!(pipeline.to_string(), SCRIPT);
        assert_eq!(pipeline.stages().count(), 3);
    }

    #[test]
    fn test_stage_fields() {
        let pipeline = Pipeline::parse(SCRIPT);
        let stages: Vec<&Stage> = pipeline.stages().collect();

        assert_eq!(stages[0].var, "jid0");
        assert_eq!(stages[0].name(), "GW150914_data0");
        assert_eq!(stages[0].output(), Some("log_data_generation/GW150914_data0.out"));
        assert_eq!(stages[0].error(), Some("log_data_generation/GW150914_data0.err"));
        assert_eq!(stages[0].script, "submit/GW150914_data0.sh");
        assert!(stages[0].is_data_generation());

        assert_eq!(stages[1].dependencies(), vec!["jid0"]);
        assert!(!stages[1].is_data_generation());
        assert!(!stages[2].is_data_generation());
    }

    #[test]
    fn test_detach_data_generation() {
        let mut pipeline = Pipeline::parse(SCRIPT);

        let stage = pipeline.detach_data_generation().unwrap();

        assert_eq!(stage.var, "jid0");
        let expected = SCRIPT
            .replace("jid0=($(sbatch --mem=8G --job-name=GW150914_data0 --output=log_data_generation/GW150914_data0.out --error=log_data_generation/GW150914_data0.err submit/GW150914_data0.sh))\n", "")
            .replace("echo \"GW150914_data0 ${jid0[-1]}\" >> submit/slurm_ids\n", "")
            .replace(" --dependency=afterok:${jid0[-1]}", "");
        assert_eq!(pipeline.to_string(), expected);
        assert!(pipeline.stages().all(|stage| !stage.dependencies().contains(&"jid0")));
    }

    #[test]
    fn test_detach_keeps_other_dependencies() {
        let script = "\
jid0=($(sbatch --job-name=run_data0 submit/run_data0.sh))
echo \"run_data0 ${jid0[-1]}\" >> submit/slurm_ids
jid1=($(sbatch --job-name=other submit/other.sh))
jid2=($(sbatch --job-name=merge --dependency=afterok:${jid1[-1]}:${jid0[-1]} submit/merge.sh))
";
        let mut pipeline = Pipeline::parse(script);
        pipeline.detach("jid0").unwrap();

        assert_eq!(
            pipeline.to_string(),
            "\
jid1=($(sbatch --job-name=other submit/other.sh))
jid2=($(sbatch --job-name=merge --dependency=afterok:${jid1[-1]} submit/merge.sh))
"
        );
    }

    #[test]
    fn test_detach_keeps_indentation_of_dependents() {
        let script = "\
if [ -n \"$RUN\" ]; then
  jid0=($(sbatch --job-name=run_data0 submit/run_data0.sh))
  echo \"run_data0 ${jid0[-1]}\" >> submit/slurm_ids
\tjid1=($(sbatch --job-name=run_analysis --dependency=afterok:${jid0[-1]} submit/run_analysis.sh))
fi
";
        let mut pipeline = Pipeline::parse(script);
        pipeline.detach_data_generation().unwrap();

        assert_eq!(
            pipeline.to_string(),
            "\
if [ -n \"$RUN\" ]; then
\tjid1=($(sbatch --job-name=run_analysis submit/run_analysis.sh))
fi
"
        );
    }

    #[test]
    fn test_detach_without_generation_stage() {
        let script = "jid0=($(sbatch --job-name=run_analysis submit/run_analysis.sh))\n";
        let mut pipeline = Pipeline::parse(script);

        assert!(pipeline.detach_data_generation().is_none());
        assert_eq!(pipeline.to_string(), script);
    }

    #[test]
    fn test_unparsable_lines_are_verbatim() {
        let pipeline = Pipeline::parse("jid-0=($(sbatch x.sh))\nsbatch y.sh\n");
        assert_eq!(pipeline.stages().count(), 0);
        assert!(matches!(&pipeline.lines()[0], Line::Verbatim(_)));
    }

    #[test]
    fn test_built_pipeline_renders_native_syntax() {
        let mut pipeline = Pipeline::new();
        pipeline.push_stage(
            Stage::new("jid0", vec![SbatchArg::Plain("--job-name=a_data0".to_string())], "submit/a_data0.sh"),
            "submit/slurm_ids",
        );
        pipeline.push_stage(
            Stage::new("jid1", vec![SbatchArg::AfterOk(vec!["jid0".to_string()])], "submit/b.sh"),
            "submit/slurm_ids",
        );

        assert_eq!(
            pipeline.to_string(),
            "\
jid0=($(sbatch --job-name=a_data0 submit/a_data0.sh))
echo \"a_data0 ${jid0[-1]}\" >> submit/slurm_ids
jid1=($(sbatch --dependency=afterok:${jid0[-1]} submit/b.sh))
echo \"b ${jid1[-1]}\" >> submit/slurm_ids
"
        );
        assert_eq!(Pipeline::parse(&pipeline.to_string()).to_string(), pipeline.to_string());
    }
}
