//! SQL emission for FastProp features.
//!
//! Each template translates into one `CREATE TABLE "FEATURE_k" AS SELECT
//! agg(value_expr) ... LEFT JOIN ... GROUP BY t1.rowid` statement.
//! Aggregations without an ANSI spelling keep their catalogue name with
//! spaces replaced by underscores, the way the engine's SQL dialect
//! transpilers expect them.

use crate::aggregations::Aggregation;
use crate::containers::column::Role;
use crate::containers::encoding::Encoding;
use crate::containers::feature::{AbstractFeature, Condition, DataUsed, NO_CATEGORICAL_VALUE};
use crate::containers::schema::FrameSchema;
use crate::error::{Error, Result};
use crate::sql::{float_literal, quote, string_literal, JoinPath};

/// Renders one feature template as a complete `CREATE TABLE` statement.
pub fn feature_to_sql(
    feature: &AbstractFeature,
    feature_num: usize,
    categories: &Encoding,
    population: &FrameSchema,
    peripherals: &[FrameSchema],
    paths: &[JoinPath],
    use_timestamps: bool,
) -> Result<String> {
    let input = &peripherals[feature.peripheral];
    let path = &paths[feature.peripheral];

    let select = select_statement(feature, categories, population, input, path)?;
    let join = path.render(use_timestamps);

    let mut where_clauses: Vec<String> = Vec::new();
    for condition in &feature.conditions {
        where_clauses.push(condition_sql(condition, categories, population, input, path)?);
    }
    let where_sql = if where_clauses.is_empty() {
        String::new()
    } else {
        format!("\nWHERE {}", where_clauses.join("\nAND "))
    };

    Ok(format!(
        "CREATE TABLE \"FEATURE_{feature_num}\" AS\nSELECT {select} AS \"feature_{feature_num}\",\n       t1.rowid AS rownum\n{join}{where_sql}\nGROUP BY t1.rowid;"
    ))
}

fn select_statement(
    feature: &AbstractFeature,
    categories: &Encoding,
    output: &FrameSchema,
    input: &FrameSchema,
    path: &JoinPath,
) -> Result<String> {
    if feature.aggregation == Aggregation::AvgTimeBetween {
        return select_avg_time_between(path);
    }

    let mut value = value_to_be_aggregated(feature, categories, output, input)?;
    if matches!(feature.aggregation, Aggregation::First | Aggregation::Last) {
        value += &format!(", {}", additional_argument(feature.aggregation, path)?);
    }
    if matches!(
        feature.aggregation,
        Aggregation::TimeSinceFirstMaximum
            | Aggregation::TimeSinceFirstMinimum
            | Aggregation::TimeSinceLastMaximum
            | Aggregation::TimeSinceLastMinimum
    ) {
        value += &format!(", {}", additional_argument(feature.aggregation, path)?);
    }

    Ok(match feature.aggregation {
        Aggregation::Count if feature.data_used == DataUsed::NotApplicable => {
            "COUNT( * )".to_string()
        }
        Aggregation::CountDistinct => format!("COUNT( DISTINCT {value} )"),
        Aggregation::CountMinusCountDistinct => {
            format!("COUNT( {value} ) - COUNT( DISTINCT {value} )")
        }
        agg => {
            let name = agg.as_str().replace(' ', "_");
            format!("{name}( {value} )")
        }
    })
}

fn select_avg_time_between(path: &JoinPath) -> Result<String> {
    let (_, per_ts) = path.time_stamps.as_ref().ok_or_else(|| {
        Error::Internal(format!(
            "AVG TIME BETWEEN on a join without time stamps ('{}')",
            path.peripheral
        ))
    })?;
    let ts = quote("t2", per_ts);
    Ok(format!(
        "CASE WHEN COUNT( * ) > 1 THEN ( MAX( {ts} ) - MIN( {ts} ) ) / ( COUNT( * ) - 1 ) ELSE 0 END"
    ))
}

/// The second argument of order-sensitive aggregations: the input time
/// stamp for FIRST/LAST, the time difference for the TIME SINCE family.
fn additional_argument(aggregation: Aggregation, path: &JoinPath) -> Result<String> {
    let (pop_ts, per_ts) = path.time_stamps.as_ref().ok_or_else(|| {
        Error::Internal(format!(
            "{aggregation} on a join without time stamps ('{}')",
            path.peripheral
        ))
    })?;
    Ok(match aggregation {
        Aggregation::First | Aggregation::Last => quote("t2", per_ts),
        _ => format!("{} - {}", quote("t1", pop_ts), quote("t2", per_ts)),
    })
}

fn value_to_be_aggregated(
    feature: &AbstractFeature,
    categories: &Encoding,
    output: &FrameSchema,
    input: &FrameSchema,
) -> Result<String> {
    match feature.data_used {
        DataUsed::Categorical => {
            let name = column_name(input, Role::Categorical, feature.input_col, "t2")?;
            if feature.categorical_value == NO_CATEGORICAL_VALUE {
                Ok(name)
            } else {
                let category = categories.get_or_null(feature.categorical_value);
                Ok(format!(
                    "CASE WHEN {name} = {} THEN 1 ELSE 0 END",
                    string_literal(category)
                ))
            }
        }
        DataUsed::Discrete => column_name(input, Role::Discrete, feature.input_col, "t2"),
        DataUsed::Numerical => column_name(input, Role::Numerical, feature.input_col, "t2"),
        DataUsed::NotApplicable => Ok("*".to_string()),
        DataUsed::SameUnitsCategorical => {
            let name1 = column_name(output, Role::Categorical, feature.output_col, "t1")?;
            let name2 = column_name(input, Role::Categorical, feature.input_col, "t2")?;
            Ok(format!("CASE WHEN {name1} = {name2} THEN 1 ELSE 0 END"))
        }
        DataUsed::SameUnitsDiscrete => {
            let name1 = column_name(output, Role::Discrete, feature.output_col, "t1")?;
            let name2 = column_name(input, Role::Discrete, feature.input_col, "t2")?;
            Ok(format!("{name1} - {name2}"))
        }
        DataUsed::SameUnitsNumerical => {
            let name1 = column_name(output, Role::Numerical, feature.output_col, "t1")?;
            let name2 = column_name(input, Role::Numerical, feature.input_col, "t2")?;
            Ok(format!("{name1} - {name2}"))
        }
        DataUsed::Subfeatures => Err(Error::Internal(
            "FastProp features never aggregate subfeatures".to_string(),
        )),
        DataUsed::Lag | DataUsed::TimeDiff => Err(Error::Internal(
            "time windows are conditions, not aggregated values".to_string(),
        )),
    }
}

fn condition_sql(
    condition: &Condition,
    categories: &Encoding,
    output: &FrameSchema,
    input: &FrameSchema,
    path: &JoinPath,
) -> Result<String> {
    match condition.data_used {
        DataUsed::Categorical => {
            let name = column_name(input, Role::Categorical, condition.input_col, "t2")?;
            let category = categories.get_or_null(condition.category_used);
            Ok(format!("{name} = {}", string_literal(category)))
        }
        DataUsed::SameUnitsCategorical => {
            let name1 = column_name(output, Role::Categorical, condition.output_col, "t1")?;
            let name2 = column_name(input, Role::Categorical, condition.input_col, "t2")?;
            Ok(format!("{name1} = {name2}"))
        }
        DataUsed::Lag => {
            let (pop_ts, per_ts) = path.time_stamps.as_ref().ok_or_else(|| {
                Error::Internal("lag condition on a join without time stamps".to_string())
            })?;
            let col1 = quote("t1", pop_ts);
            let col2 = quote("t2", per_ts);
            Ok(format!(
                "( {col2} + {upper} > {col1} AND {col2} + {lower} <= {col1} )",
                upper = float_literal(condition.bound_upper),
                lower = float_literal(condition.bound_lower),
            ))
        }
        other => Err(Error::Internal(format!(
            "'{other:?}' cannot appear as a FastProp condition"
        ))),
    }
}

fn column_name(schema: &FrameSchema, role: Role, ix: usize, alias: &str) -> Result<String> {
    schema
        .names_with_role(role)
        .get(ix)
        .map(|name| quote(alias, name))
        .ok_or_else(|| {
            Error::Internal(format!(
                "no {role} column {ix} in frame '{}'",
                schema.name
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::column::{Column, Role};
    use crate::containers::frame::DataFrame;
    use crate::containers::join_graph::GraphEdge;

    fn schemas() -> (FrameSchema, FrameSchema) {
        let mut pop = DataFrame::new("POPULATION");
        pop.add_int_column(Role::JoinKey, Column::new("jk", vec![1]))
            .unwrap();
        pop.add_float_column(Role::TimeStamp, Column::new("ts", vec![0.0]))
            .unwrap();

        let mut per = DataFrame::new("ORDERS");
        per.add_int_column(Role::JoinKey, Column::new("jk", vec![1]))
            .unwrap();
        per.add_float_column(Role::TimeStamp, Column::new("ts", vec![0.0]))
            .unwrap();
        per.add_float_column(Role::Numerical, Column::new("amount", vec![1.0]))
            .unwrap();
        per.add_int_column(Role::Categorical, Column::new("status", vec![0]))
            .unwrap();
        (FrameSchema::of(&pop), FrameSchema::of(&per))
    }

    fn path() -> JoinPath {
        JoinPath::from_edge(
            "POPULATION",
            "ORDERS",
            &GraphEdge {
                parent: 0,
                child: 1,
                keys: vec![("jk".to_string(), "jk".to_string())],
                time_stamps: Some(("ts".to_string(), "ts".to_string())),
                upper_time_stamp: None,
            },
        )
    }

    #[test]
    fn test_avg_feature_sql() {
        let (pop, per) = schemas();
        let feature = AbstractFeature::new(0, Aggregation::Avg, DataUsed::Numerical);
        let sql = feature_to_sql(
            &feature,
            1,
            &Encoding::new(),
            &pop,
            std::slice::from_ref(&per),
            &[path()],
            true,
        )
        .unwrap();
        assert!(sql.starts_with("CREATE TABLE \"FEATURE_1\" AS"));
        assert!(sql.contains("AVG( t2.\"amount\" )"));
        assert!(sql.contains("GROUP BY t1.rowid;"));
        assert!(sql.contains("t2.\"ts\" <= t1.\"ts\""));
    }

    #[test]
    fn test_pinned_category_sql() {
        let (pop, per) = schemas();
        let mut categories = Encoding::new();
        let code = categories.intern("open");
        let feature = AbstractFeature::new(0, Aggregation::Sum, DataUsed::Categorical)
            .with_category(code);
        let sql = feature_to_sql(
            &feature,
            2,
            &categories,
            &pop,
            std::slice::from_ref(&per),
            &[path()],
            true,
        )
        .unwrap();
        assert!(sql.contains("CASE WHEN t2.\"status\" = 'open' THEN 1 ELSE 0 END"));
    }

    #[test]
    fn test_count_and_spaced_aggregation_names() {
        let (pop, per) = schemas();
        let count = AbstractFeature::new(0, Aggregation::Count, DataUsed::NotApplicable);
        let sql = feature_to_sql(
            &count,
            1,
            &Encoding::new(),
            &pop,
            std::slice::from_ref(&per),
            &[path()],
            true,
        )
        .unwrap();
        assert!(sql.contains("COUNT( * )"));

        let above = AbstractFeature::new(0, Aggregation::CountAboveMean, DataUsed::Numerical);
        let sql = feature_to_sql(
            &above,
            1,
            &Encoding::new(),
            &pop,
            std::slice::from_ref(&per),
            &[path()],
            true,
        )
        .unwrap();
        assert!(sql.contains("COUNT_ABOVE_MEAN( t2.\"amount\" )"));
    }

    #[test]
    fn test_lag_condition_sql() {
        let (pop, per) = schemas();
        let feature = AbstractFeature::new(0, Aggregation::Avg, DataUsed::Numerical)
            .with_conditions(vec![Condition {
                data_used: DataUsed::Lag,
                input_col: 0,
                output_col: 0,
                category_used: NO_CATEGORICAL_VALUE,
                bound_lower: 0.0,
                bound_upper: 86400.0,
            }]);
        let sql = feature_to_sql(
            &feature,
            1,
            &Encoding::new(),
            &pop,
            std::slice::from_ref(&per),
            &[path()],
            true,
        )
        .unwrap();
        assert!(sql.contains("WHERE ( t2.\"ts\" + 86400.0 > t1.\"ts\" AND t2.\"ts\" + 0.0 <= t1.\"ts\" )"));
    }
}
