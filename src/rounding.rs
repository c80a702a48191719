//! Decimal rounding for report values
//!
//! Reported tons and kilograms round half to even at the requested decimal place, on
//! the scaled value: `0.0285` to 3 places is `0.028`, `0.0075` is `0.008`.

use polars::prelude::*;

/// Round to `decimals` places, ties to even
pub fn round_to_decimals(value: f64, decimals: u32) -> f64 {
    let factor = 10_f64.powi(decimals as i32);
    (value * factor).round_ties_even() / factor
}

/// Element-wise [`round_to_decimals`] over a numeric expression (output Float64, nulls kept)
pub fn round_expr(expr: Expr, decimals: u32) -> Expr {
    expr.map(
        move |column: Column| {
            let values = column.cast(&DataType::Float64)?;
            let rounded = values
                .f64()?
                .apply_values(|v| round_to_decimals(v, decimals));
            Ok(Some(rounded.into_column()))
        },
        GetOutput::from_type(DataType::Float64),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ties_go_to_even() {
        assert_eq!(round_to_decimals(0.0285, 3), 0.028);
        assert_eq!(round_to_decimals(0.0075, 3), 0.008);
        assert_eq!(round_to_decimals(2.5, 0), 2.0);
        assert_eq!(round_to_decimals(265.536, 2), 265.54);
    }

    #[test]
    fn test_round_expr_keeps_nulls_and_names() {
        let df = df!["E_CO_TN" => &[Some(0.0285), None, Some(0.0075)]].unwrap();
        let out = df
            .lazy()
            .select([round_expr(col("E_CO_TN"), 3)])
            .collect()
            .unwrap();
        let values = out.column("E_CO_TN").unwrap().f64().unwrap();

        assert_eq!(values.get(0), Some(0.028));
        assert_eq!(values.get(1), None);
        assert_eq!(values.get(2), Some(0.008));
    }
}
