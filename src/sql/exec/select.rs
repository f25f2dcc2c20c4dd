/// SELECT driver: subquery resolution, star expansion, alias and aggregate
/// rewriting, plan construction, projection, DISTINCT.
use std::collections::{HashMap, HashSet};

use crate::btree::key_encoding::encode_values;
use crate::error::Result;
use crate::sql::ast::*;
use crate::sql::eval::eval_expr;
use crate::sql::eval::functions::is_aggregate_call;
use crate::sql::exec::aggregate::AGG_BINDING;
use crate::sql::exec::operators::{plan_shape, Operator};
use crate::sql::exec::{resolve_subqueries, ExecCtx, Row};
use crate::sql::planner::{plan_from, Plan};
use crate::storage::page_store::PageStore;

pub fn run_select<S: PageStore>(
    ctx: &mut ExecCtx<'_, S>,
    select: &Select,
) -> Result<Vec<Row>> {
    // Uncorrelated subqueries run once, up front.
    let where_clause = select
        .where_clause
        .as_ref()
        .map(|e| resolve_subqueries(ctx, e))
        .transpose()?;
    let having = select
        .having
        .as_ref()
        .map(|e| resolve_subqueries(ctx, e))
        .transpose()?;

    let base = match &select.from {
        Some(from) => plan_from(ctx.store, ctx.catalog, from, where_clause)?,
        None => {
            // SELECT without FROM: a WHERE can still veto the single row.
            let mut plan = Plan::Nothing;
            if let Some(predicate) = where_clause {
                plan = Plan::Filter {
                    input: Box::new(plan),
                    predicate,
                };
            }
            plan
        }
    };
    let shape = plan_shape(&base);

    // Expand the projection list; `*` covers every bound column in order.
    let mut projections: Vec<(String, Expr)> = Vec::new();
    let mut aliases: HashMap<String, Expr> = HashMap::new();
    for column in &select.columns {
        match column {
            SelectColumn::Star => {
                for (binding, cols) in &shape {
                    for col in cols {
                        projections.push((
                            col.clone(),
                            Expr::Column {
                                table: Some(binding.clone()),
                                name: col.clone(),
                            },
                        ));
                    }
                }
            }
            SelectColumn::Expr { expr, alias } => {
                let expr = resolve_subqueries(ctx, expr)?;
                let name = match alias {
                    Some(a) => a.clone(),
                    None => match &expr {
                        Expr::Column { name, .. } => name.clone(),
                        other => other.to_string(),
                    },
                };
                if let Some(a) = alias {
                    aliases.insert(a.clone(), expr.clone());
                }
                projections.push((name, expr));
            }
        }
    }

    // Aliases are usable in GROUP BY, HAVING and ORDER BY.
    let group_by: Vec<Expr> = select
        .group_by
        .iter()
        .map(|e| {
            let resolved = resolve_subqueries(ctx, e)?;
            Ok(substitute_aliases(resolved, &aliases))
        })
        .collect::<Result<_>>()?;
    let having = having.map(|e| substitute_aliases(e, &aliases));
    let order_by: Vec<OrderByItem> = select
        .order_by
        .iter()
        .map(|item| {
            let resolved = resolve_subqueries(ctx, &item.expr)?;
            Ok(OrderByItem {
                expr: substitute_aliases(resolved, &aliases),
                descending: item.descending,
            })
        })
        .collect::<Result<_>>()?;

    // Collect aggregate calls from every post-grouping expression.
    let mut aggregates: Vec<Expr> = Vec::new();
    let mut seen_aggs: HashSet<String> = HashSet::new();
    {
        let mut collect = |expr: &Expr| {
            collect_aggregates(expr, &mut aggregates, &mut seen_aggs);
        };
        for (_, expr) in &projections {
            collect(expr);
        }
        if let Some(h) = &having {
            collect(h);
        }
        for item in &order_by {
            collect(&item.expr);
        }
    }

    let grouped = !aggregates.is_empty() || !group_by.is_empty();
    let mut plan = base;
    if grouped {
        plan = Plan::Aggregate {
            input: Box::new(plan),
            group_by,
            aggregates: aggregates.clone(),
        };
        // Downstream expressions see aggregates as #agg columns.
        for (_, expr) in &mut projections {
            *expr = rewrite_aggregates(expr.clone());
        }
    }
    if let Some(h) = having {
        let predicate = if grouped { rewrite_aggregates(h) } else { h };
        plan = Plan::Filter {
            input: Box::new(plan),
            predicate,
        };
    }
    if !order_by.is_empty() {
        let keys = order_by
            .into_iter()
            .map(|item| OrderByItem {
                expr: if grouped {
                    rewrite_aggregates(item.expr)
                } else {
                    item.expr
                },
                descending: item.descending,
            })
            .collect();
        plan = Plan::Sort {
            input: Box::new(plan),
            keys,
        };
    }

    // LIMIT below the projection unless DISTINCT must dedupe first.
    let limit = select
        .limit
        .as_ref()
        .map(|e| resolve_subqueries(ctx, e))
        .transpose()?;
    let offset = select
        .offset
        .as_ref()
        .map(|e| resolve_subqueries(ctx, e))
        .transpose()?;
    if !select.distinct && (limit.is_some() || offset.is_some()) {
        plan = Plan::Limit {
            input: Box::new(plan),
            limit: limit.clone(),
            offset: offset.clone(),
        };
    }

    // Drive the pipeline and project.
    let mut operator = Operator::build(&plan, ctx)?;
    let mut rows = Vec::new();
    while let Some(source) = operator.next(ctx)? {
        let env = ctx.eval_env();
        let resolver = source.resolver();
        let mut values = Vec::with_capacity(projections.len());
        for (name, expr) in &projections {
            values.push((name.clone(), eval_expr(expr, &resolver, &env)?));
        }
        drop(env);
        rows.push(Row { values });
    }

    if select.distinct {
        let mut seen = HashSet::new();
        rows.retain(|row| {
            let key = encode_values(
                &row.values.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>(),
            );
            seen.insert(key)
        });
        // DISTINCT deduped above; apply LIMIT/OFFSET on the result.
        let env = ctx.eval_env();
        let skip = match &offset {
            Some(e) => eval_expr(e, &|_, _| None, &env)?.as_i64().unwrap_or(0).max(0) as usize,
            None => 0,
        };
        let take = match &limit {
            Some(e) => match eval_expr(e, &|_, _| None, &env)?.as_i64() {
                Some(n) if n >= 0 => n as usize,
                _ => usize::MAX,
            },
            None => usize::MAX,
        };
        drop(env);
        rows = rows.into_iter().skip(skip).take(take).collect();
    }

    Ok(rows)
}

fn collect_aggregates(expr: &Expr, out: &mut Vec<Expr>, seen: &mut HashSet<String>) {
    if let Expr::Function {
        name, args, star, ..
    } = expr
    {
        if is_aggregate_call(name, args.len(), *star) {
            let printed = expr.to_string();
            if seen.insert(printed) {
                out.push(expr.clone());
            }
            // Aggregate arguments are evaluated per input row by the
            // accumulator, not collected further.
            return;
        }
    }
    crate::sql::planner::walk_children(expr, &mut |child| {
        collect_aggregates(child, out, seen);
    });
}

/// Replace aggregate calls with references to the #agg cells produced by
/// the aggregation operator.
fn rewrite_aggregates(expr: Expr) -> Expr {
    if let Expr::Function {
        ref name,
        ref args,
        star,
        ..
    } = expr
    {
        if is_aggregate_call(name, args.len(), star) {
            return Expr::Column {
                table: Some(AGG_BINDING.to_string()),
                name: expr.to_string(),
            };
        }
    }
    map_children(expr, &rewrite_aggregates)
}

/// Replace bare column references that name a projection alias with the
/// aliased expression.
fn substitute_aliases(expr: Expr, aliases: &HashMap<String, Expr>) -> Expr {
    if let Expr::Column { table: None, name } = &expr {
        if let Some(replacement) = aliases.get(name) {
            return replacement.clone();
        }
    }
    map_children(expr, &|e| substitute_aliases(e, aliases))
}

/// Structure-preserving map over an expression's direct children.
fn map_children(expr: Expr, f: &dyn Fn(Expr) -> Expr) -> Expr {
    match expr {
        Expr::Unary { op, expr } => Expr::Unary {
            op,
            expr: Box::new(f(*expr)),
        },
        Expr::Binary { left, op, right } => Expr::Binary {
            left: Box::new(f(*left)),
            op,
            right: Box::new(f(*right)),
        },
        Expr::Function {
            name,
            args,
            distinct,
            star,
        } => Expr::Function {
            name,
            args: args.into_iter().map(f).collect(),
            distinct,
            star,
        },
        Expr::Case {
            operand,
            branches,
            else_expr,
        } => Expr::Case {
            operand: operand.map(|e| Box::new(f(*e))),
            branches: branches.into_iter().map(|(w, t)| (f(w), f(t))).collect(),
            else_expr: else_expr.map(|e| Box::new(f(*e))),
        },
        Expr::InList {
            expr,
            list,
            negated,
        } => Expr::InList {
            expr: Box::new(f(*expr)),
            list: list.into_iter().map(f).collect(),
            negated,
        },
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => Expr::Between {
            expr: Box::new(f(*expr)),
            low: Box::new(f(*low)),
            high: Box::new(f(*high)),
            negated,
        },
        Expr::Like {
            expr,
            pattern,
            negated,
        } => Expr::Like {
            expr: Box::new(f(*expr)),
            pattern: Box::new(f(*pattern)),
            negated,
        },
        Expr::IsNull { expr, negated } => Expr::IsNull {
            expr: Box::new(f(*expr)),
            negated,
        },
        Expr::Collate { expr, collation } => Expr::Collate {
            expr: Box::new(f(*expr)),
            collation,
        },
        Expr::Cast { expr, type_name } => Expr::Cast {
            expr: Box::new(f(*expr)),
            type_name,
        },
        leaf @ (Expr::Literal(_)
        | Expr::Column { .. }
        | Expr::Param(_)
        | Expr::Subquery(_)
        | Expr::InSelect { .. }) => leaf,
    }
}
