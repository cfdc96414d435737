use common::Result;
use datafusion::arrow::array::{Array, ArrayRef, AsArray, StringArray};
use datafusion::arrow::compute::cast;
use datafusion::arrow::datatypes::DataType;
use datafusion::common::DataFusionError;
use datafusion::execution::context::SessionContext;
use datafusion::logical_expr::{ColumnarValue, Volatility, create_udf};
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub const SONGPLAY_KEY_UDF: &str = "songplay_key";

/// Registers all UDFs with the SessionContext
pub fn register_udfs(ctx: &SessionContext) -> Result<()> {
    // Stable content hash of a song play's natural key
    let songplay_key = create_udf(
        SONGPLAY_KEY_UDF,
        vec![DataType::Utf8],
        DataType::Utf8,
        Volatility::Immutable,
        Arc::new(|args: &[ColumnarValue]| hash_natural_keys(args).map_err(|e| DataFusionError::Internal(e.to_string()))),
    );

    ctx.register_udf(songplay_key);

    Ok(())
}

/// Hex SHA-256 of every input string; nulls stay null.
fn hash_natural_keys(args: &[ColumnarValue]) -> Result<ColumnarValue> {
    let arrays = ColumnarValue::values_to_arrays(args)?;
    let input = arrays
        .first()
        .ok_or_else(|| DataFusionError::Internal("songplay_key expects one argument".to_string()))?;

    let input: ArrayRef = match input.data_type() {
        DataType::Utf8 => input.clone(),
        _ => cast(input, &DataType::Utf8)?,
    };
    let strings = input.as_string::<i32>();

    let result: StringArray = strings
        .iter()
        .map(|key| key.map(sha256_hex))
        .collect();

    if matches!(args.first(), Some(ColumnarValue::Scalar(_))) && result.len() == 1 {
        let scalar = datafusion::scalar::ScalarValue::try_from_array(&result, 0)?;
        return Ok(ColumnarValue::Scalar(scalar));
    }

    Ok(ColumnarValue::Array(Arc::new(result)))
}

pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafusion::scalar::ScalarValue;

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_natural_keys() {
        let input = StringArray::from(vec![Some("10|20|946684800000"), None, Some("10|20|946684800000")]);

        let result = hash_natural_keys(&[ColumnarValue::Array(Arc::new(input))]).unwrap();

        if let ColumnarValue::Array(array) = result {
            let str_array = array.as_any().downcast_ref::<StringArray>().unwrap();
            assert_eq!(str_array.value(0).len(), 64);
            assert!(str_array.is_null(1));
            assert_eq!(str_array.value(0), str_array.value(2));
        } else {
            panic!("Expected Array result");
        }
    }

    #[test]
    fn test_hash_natural_keys_scalar() {
        let result =
            hash_natural_keys(&[ColumnarValue::Scalar(ScalarValue::Utf8(Some("abc".to_string())))])
                .unwrap();

        match result {
            ColumnarValue::Scalar(ScalarValue::Utf8(Some(hash))) => {
                assert_eq!(hash, sha256_hex("abc"))
            }
            other => panic!("Expected scalar result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_udf_is_callable_from_sql() {
        let ctx = SessionContext::new();
        register_udfs(&ctx).unwrap();

        let batches = ctx
            .sql("SELECT songplay_key('abc') AS k")
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();

        let column = batches[0].column(0);
        let column = cast(column, &DataType::Utf8).unwrap();
        assert_eq!(column.as_string::<i32>().value(0), sha256_hex("abc"));
    }
}
