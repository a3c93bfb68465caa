//! Compilation pipeline
//!
//! One [`ProcessingContext`] per template; stages run sequentially in a
//! fixed dependency order and augment the context until [`finish`] assembles
//! the immutable IR. A failing stage aborts the run and is named in the
//! error; inference warnings accumulate without failing the compile.
//!
//! [`finish`]: ProcessingContext::finish

use crate::config::{Config, SystemFieldConfig};
use crate::dialect::Dialect;
use crate::error::{CompileError, Warnings};
use crate::ir::{
    CelEnvironment, CelExpression, EnvVar, FORMAT_VERSION, ImplicitParameter, Instruction,
    IntermediateFormat, Parameter, Response, ResponseAffinity,
};
use crate::parser::{self, FunctionDefinition, Statement, TableReference};
use crate::schema::DatabaseSchema;
use crate::stage;
use crate::stage::type_inference::TypeInference;
use crate::tokenizer::{self, Token};
use std::collections::BTreeMap;
use thiserror::Error;

/// A fatal pipeline error, naming the stage that failed.
#[derive(Debug, Error)]
#[error("{stage}: {error}")]
pub struct StageError {
    pub stage: &'static str,
    #[source]
    pub error: CompileError,
}

/// Trait every pipeline stage implements.
pub trait Stage {
    /// Stable stage name used in diagnostics.
    fn name(&self) -> &'static str;

    fn run(&self, ctx: &mut ProcessingContext) -> Result<(), CompileError>;
}

/// Shared state of one compilation. Lives only for a single pipeline run.
pub struct ProcessingContext {
    pub config: Config,
    pub dialect: Option<Dialect>,
    pub schema: Option<DatabaseSchema>,
    pub constants: BTreeMap<String, String>,

    /// Working token stream; `TokenTransformer` and `ReturningProcessor`
    /// replace it with rewritten copies.
    pub tokens: Vec<Token>,
    pub statement: Statement,
    pub function_def: Option<FunctionDefinition>,

    // stage outputs
    pub name: String,
    pub description: String,
    pub function_name: String,
    pub parameters: Vec<Parameter>,
    pub expressions: Vec<CelExpression>,
    pub environments: Vec<CelEnvironment>,
    pub envs: Vec<Vec<EnvVar>>,
    pub system_fields: Vec<SystemFieldConfig>,
    pub implicit_parameters: Vec<ImplicitParameter>,
    pub instructions: Vec<Instruction>,
    pub response_affinity: ResponseAffinity,
    pub responses: Vec<Response>,
    pub table_references: Vec<TableReference>,
    pub warnings: Warnings,
}

impl ProcessingContext {
    pub fn new(source: &str, config: Config) -> Result<Self, CompileError> {
        let tokens = tokenizer::tokenize(source)?;
        let (statement, function_def) = parser::parse(&tokens)?;
        let dialect = config.target_dialect();
        let schema = if config.schema.tables.is_empty() {
            None
        } else {
            Some(DatabaseSchema::from_config(&config.schema))
        };
        let constants = config.constants.clone();
        Ok(Self {
            config,
            dialect,
            schema,
            constants,
            tokens,
            statement,
            function_def,
            name: String::new(),
            description: String::new(),
            function_name: String::new(),
            parameters: Vec::new(),
            expressions: Vec::new(),
            environments: Vec::new(),
            envs: Vec::new(),
            system_fields: Vec::new(),
            implicit_parameters: Vec::new(),
            instructions: Vec::new(),
            response_affinity: ResponseAffinity::Many,
            responses: Vec::new(),
            table_references: Vec::new(),
            warnings: Warnings::new(),
        })
    }

    /// Assemble the immutable IR.
    pub fn finish(self) -> CompileResult {
        let has_ordered_result = self.statement.has_order_by();
        CompileResult {
            format: IntermediateFormat {
                format_version: FORMAT_VERSION.to_string(),
                name: self.name,
                description: self.description,
                function_name: self.function_name,
                parameters: self.parameters,
                responses: self.responses,
                response_affinity: self.response_affinity,
                instructions: self.instructions,
                cel_expressions: self.expressions,
                cel_environments: self.environments,
                envs: self.envs,
                system_fields: self.system_fields,
                implicit_parameters: self.implicit_parameters,
                has_ordered_result,
            },
            warnings: self.warnings.into_vec(),
        }
    }

    #[cfg(test)]
    pub fn for_tests(source: &str) -> Self {
        Self::new(source, Config::default()).expect("test template must parse")
    }

    #[cfg(test)]
    pub fn for_tests_with_config(source: &str, config: Config) -> Self {
        Self::new(source, config).expect("test template must parse")
    }
}

/// A compiled template: the IR plus non-fatal warnings.
#[derive(Debug, Clone)]
pub struct CompileResult {
    pub format: IntermediateFormat,
    pub warnings: Vec<String>,
}

/// The fixed-order stage runner.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::with_type_inference(Box::new(stage::DefaultTypeInference))
    }

    /// Substitute the type-inference collaborator.
    pub fn with_type_inference(inference: Box<dyn TypeInference>) -> Self {
        Self {
            stages: vec![
                Box::new(stage::MetadataExtractor),
                Box::new(stage::CelExpressionExtractor),
                Box::new(stage::SystemFieldProcessor),
                Box::new(stage::TokenTransformer),
                Box::new(stage::ReturningProcessor),
                Box::new(stage::InstructionGenerator),
                Box::new(stage::ResponseAffinityDetector),
                Box::new(stage::ResponseTypeInference { inference }),
                Box::new(stage::HierarchyKeyLevelProcessor),
                Box::new(stage::TableReferencesProcessor),
            ],
        }
    }

    /// Compile one template source to IR.
    pub fn compile(&self, source: &str, config: &Config) -> Result<CompileResult, StageError> {
        let mut ctx = ProcessingContext::new(source, config.clone()).map_err(|error| {
            StageError {
                stage: "frontend",
                error,
            }
        })?;
        for stage in &self.stages {
            stage.run(&mut ctx).map_err(|error| StageError {
                stage: stage.name(),
                error,
            })?;
        }
        Ok(ctx.finish())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience entry point: compile a template with the default pipeline.
pub fn compile_template(source: &str, config: &Config) -> Result<CompileResult, StageError> {
    Pipeline::new().compile(source, config)
}
