//! CEL expression extraction and binding environments
//!
//! Walks every clause (the CTE included) in source order, collecting the
//! unique CEL expressions referenced by directives and maintaining the
//! environment stack: environment 0 is the parameter base, and each `for`
//! introduces a child environment holding every enclosing loop variable plus
//! its own iterator, typed `any`.

use crate::error::CompileError;
use crate::ir::{CelEnvironment, CelExpression, EnvVar};
use crate::pipeline::{ProcessingContext, Stage};
use crate::tokenizer::{Directive, parse_for_binding};

pub struct CelExpressionExtractor;

impl Stage for CelExpressionExtractor {
    fn name(&self) -> &'static str {
        "CELExpressionExtractor"
    }

    fn run(&self, ctx: &mut ProcessingContext) -> Result<(), CompileError> {
        let mut extractor = Extractor::default();
        for clause in &ctx.statement.clauses {
            for tok in &clause.tokens {
                let Some(directive) = &tok.directive else {
                    continue;
                };
                let pos = tok.position.to_string();
                match directive {
                    Directive::If { condition } | Directive::ElseIf { condition } => {
                        extractor.add(condition, &pos);
                    }
                    Directive::For { binding } => {
                        let Some((variable, collection)) = parse_for_binding(binding) else {
                            // the generator reports malformed bindings with a
                            // position; nothing to collect here
                            continue;
                        };
                        extractor.add(&collection, &pos);
                        extractor.push_loop(&variable);
                        extractor.add(&variable, &pos);
                        extractor.directive_stack.push(BlockTag::For);
                    }
                    Directive::End => extractor.pop(),
                    Directive::Variable { expression } => extractor.add(expression, &pos),
                    Directive::Else
                    | Directive::Const { .. }
                    | Directive::SystemValue { .. }
                    | Directive::FunctionHeader { .. } => {}
                }
                if matches!(directive, Directive::If { .. }) {
                    extractor.directive_stack.push(BlockTag::If);
                }
            }
        }
        ctx.expressions = extractor.expressions;
        ctx.envs = extractor.envs;
        ctx.environments = build_environments(&ctx.envs);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum BlockTag {
    If,
    For,
}

#[derive(Default)]
struct Extractor {
    expressions: Vec<CelExpression>,
    envs: Vec<Vec<EnvVar>>,
    loop_vars: Vec<String>,
    /// Environment index currently in scope (0 = base).
    env_stack: Vec<usize>,
    directive_stack: Vec<BlockTag>,
}

impl Extractor {
    fn current_env(&self) -> usize {
        self.env_stack.last().copied().unwrap_or(0)
    }

    fn add(&mut self, expression: &str, position: &str) {
        let expression = expression.trim();
        if expression.is_empty() {
            return;
        }
        if self
            .expressions
            .iter()
            .any(|e| e.expression == expression)
        {
            return;
        }
        self.expressions.push(CelExpression {
            id: format!("e{}", self.expressions.len()),
            expression: expression.to_string(),
            environment_index: self.current_env(),
            position: position.to_string(),
        });
    }

    fn push_loop(&mut self, variable: &str) {
        self.loop_vars.push(variable.to_string());
        let vars = self
            .loop_vars
            .iter()
            .map(|v| EnvVar {
                name: v.clone(),
                var_type: "any".to_string(),
            })
            .collect();
        self.envs.push(vars);
        self.env_stack.push(self.envs.len());
    }

    fn pop(&mut self) {
        match self.directive_stack.pop() {
            Some(BlockTag::For) => {
                self.loop_vars.pop();
                self.env_stack.pop();
            }
            Some(BlockTag::If) | None => {}
        }
    }
}

fn build_environments(envs: &[Vec<EnvVar>]) -> Vec<CelEnvironment> {
    let mut environments = Vec::with_capacity(envs.len() + 1);
    environments.push(CelEnvironment {
        index: 0,
        additional_variables: vec![],
    });
    for (i, vars) in envs.iter().enumerate() {
        environments.push(CelEnvironment {
            index: i + 1,
            additional_variables: vars.clone(),
        });
    }
    environments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ProcessingContext;

    fn extract(src: &str) -> ProcessingContext {
        let mut ctx = ProcessingContext::for_tests(src);
        CelExpressionExtractor.run(&mut ctx).unwrap();
        ctx
    }

    fn expr_strings(ctx: &ProcessingContext) -> Vec<&str> {
        ctx.expressions
            .iter()
            .map(|e| e.expression.as_str())
            .collect()
    }

    #[test]
    fn test_simple_variable() {
        let ctx = extract("SELECT id FROM users WHERE id = /*= id */0");
        assert_eq!(expr_strings(&ctx), vec!["id"]);
        assert_eq!(ctx.expressions[0].environment_index, 0);
        assert_eq!(ctx.expressions[0].id, "e0");
        assert_eq!(ctx.envs.len(), 0);
        assert_eq!(ctx.environments.len(), 1);
    }

    #[test]
    fn test_condition_and_variable_dedup() {
        let ctx = extract(
            "SELECT id /*# if email != \"\" */, email /*# end */ FROM users WHERE email = /*= email */''",
        );
        assert_eq!(expr_strings(&ctx), vec!["email != \"\"", "email"]);
    }

    #[test]
    fn test_for_adds_collection_and_iterator() {
        let ctx = extract(
            "INSERT INTO t (a) VALUES /*# for v : items */(/*= v */0),/*# end */",
        );
        assert_eq!(expr_strings(&ctx), vec!["items", "v"]);
        // collection evaluates in the enclosing env, iterator in the new one
        assert_eq!(ctx.expressions[0].environment_index, 0);
        assert_eq!(ctx.expressions[1].environment_index, 1);
        assert_eq!(ctx.envs, vec![vec![EnvVar {
            name: "v".to_string(),
            var_type: "any".to_string(),
        }]]);
    }

    #[test]
    fn test_nested_loops_accumulate_vars() {
        let ctx = extract(
            "SELECT 1 FROM t WHERE x IN (/*# for a : xs *//*# for b : a.ys *//*= b */0/*# end *//*# end */ 0)",
        );
        assert_eq!(expr_strings(&ctx), vec!["xs", "a", "a.ys", "b"]);
        assert_eq!(ctx.envs.len(), 2);
        let names: Vec<&str> = ctx.envs[1].iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        // "a.ys" is evaluated inside the first loop
        assert_eq!(ctx.expressions[2].environment_index, 1);
        assert_eq!(ctx.expressions[3].environment_index, 2);
    }

    #[test]
    fn test_sibling_loops_get_separate_envs() {
        let ctx = extract(
            "INSERT INTO t (a) VALUES /*# for x : xs */(/*= x */0)/*# end */ /*# for y : ys */,(/*= y */0)/*# end */",
        );
        assert_eq!(ctx.envs.len(), 2);
        assert_eq!(ctx.envs[0][0].name, "x");
        assert_eq!(ctx.envs[1][0].name, "y");
        // y's iterator expression binds in environment 2
        let y = ctx
            .expressions
            .iter()
            .find(|e| e.expression == "y")
            .unwrap();
        assert_eq!(y.environment_index, 2);
    }

    #[test]
    fn test_end_of_if_does_not_pop_loop() {
        let ctx = extract(
            "INSERT INTO t (a) VALUES /*# for v : items */(/*# if flag *//*= v */0/*# end */)/*# end */",
        );
        let v = ctx
            .expressions
            .iter()
            .find(|e| e.expression == "v")
            .unwrap();
        assert_eq!(v.environment_index, 1);
    }

    #[test]
    fn test_cte_clause_is_walked() {
        let ctx = extract(
            "WITH recent AS (SELECT id FROM events WHERE ts > /*= since */0) SELECT id FROM recent",
        );
        assert_eq!(expr_strings(&ctx), vec!["since"]);
    }

    #[test]
    fn test_environment_zero_is_always_present() {
        let ctx = extract("SELECT 1");
        assert_eq!(ctx.environments.len(), 1);
        assert_eq!(ctx.environments[0].index, 0);
        assert!(ctx.environments[0].additional_variables.is_empty());
    }
}
