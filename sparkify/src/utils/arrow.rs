use arrow::array::{Array, AsArray};
use arrow::datatypes::{
    DataType, Float32Type, Float64Type, Int8Type, Int16Type, Int32Type, Int64Type, TimeUnit,
    TimestampMillisecondType, TimestampSecondType, UInt32Type, UInt64Type,
};
use arrow::record_batch::RecordBatch;
use chrono::DateTime;
use common::{Error, Result};
use serde_json::{Number, Value};

/// Flattens record batches into one JSON object per row, keyed by column name.
pub fn batches_to_json(batches: &[RecordBatch]) -> Result<Vec<Value>> {
    let mut json_rows = Vec::new();

    for batch in batches {
        let schema = batch.schema();
        for row_idx in 0..batch.num_rows() {
            let mut row = serde_json::Map::new();

            for (col_idx, field) in schema.fields().iter().enumerate() {
                let value = arrow_array_to_json(batch.column(col_idx).as_ref(), row_idx)?;
                row.insert(field.name().clone(), value);
            }

            json_rows.push(Value::Object(row));
        }
    }

    Ok(json_rows)
}

pub fn arrow_array_to_json(array: &dyn Array, index: usize) -> Result<Value> {
    if array.is_null(index) {
        return Ok(Value::Null);
    }

    Ok(match array.data_type() {
        DataType::Boolean => Value::Bool(array.as_boolean().value(index)),
        DataType::Int8 => Value::from(array.as_primitive::<Int8Type>().value(index)),
        DataType::Int16 => Value::from(array.as_primitive::<Int16Type>().value(index)),
        DataType::Int32 => Value::from(array.as_primitive::<Int32Type>().value(index)),
        DataType::Int64 => Value::from(array.as_primitive::<Int64Type>().value(index)),
        DataType::UInt32 => Value::from(array.as_primitive::<UInt32Type>().value(index)),
        DataType::UInt64 => Value::from(array.as_primitive::<UInt64Type>().value(index)),
        DataType::Float32 => float_to_json(array.as_primitive::<Float32Type>().value(index) as f64),
        DataType::Float64 => float_to_json(array.as_primitive::<Float64Type>().value(index)),
        DataType::Utf8 => Value::String(array.as_string::<i32>().value(index).to_string()),
        DataType::LargeUtf8 => Value::String(array.as_string::<i64>().value(index).to_string()),
        DataType::Utf8View => Value::String(array.as_string_view().value(index).to_string()),
        DataType::Dictionary(_, _) => {
            // Partition columns read back from hive paths come out dictionary encoded.
            let plain = arrow::compute::cast(array, &DataType::Utf8)?;
            Value::String(plain.as_string::<i32>().value(index).to_string())
        }
        DataType::Timestamp(TimeUnit::Second, _) => {
            let ts = array.as_primitive::<TimestampSecondType>().value(index);
            timestamp_to_json(DateTime::from_timestamp(ts, 0), ts)?
        }
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            let ts = array.as_primitive::<TimestampMillisecondType>().value(index);
            timestamp_to_json(DateTime::from_timestamp_millis(ts), ts)?
        }
        other => {
            return Err(Error::Other(format!(
                "Unsupported column type for JSON conversion: {:?}",
                other
            )));
        }
    })
}

fn float_to_json(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn timestamp_to_json(datetime: Option<DateTime<chrono::Utc>>, raw: i64) -> Result<Value> {
    datetime
        .map(|dt| Value::String(dt.to_rfc3339()))
        .ok_or_else(|| Error::Other(format!("Timestamp {} is out of range", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{DictionaryArray, Float64Array, Int32Array, StringArray};
    use arrow::datatypes::{Field, Schema};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_batches_to_json() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("song_id", DataType::Utf8, true),
            Field::new("year", DataType::Int32, true),
            Field::new("duration", DataType::Float64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![Some("S1"), None])),
                Arc::new(Int32Array::from(vec![Some(2000), Some(0)])),
                Arc::new(Float64Array::from(vec![Some(180.5), None])),
            ],
        )
        .unwrap();

        let rows = batches_to_json(&[batch]).unwrap();

        assert_eq!(
            rows,
            vec![
                json!({"song_id": "S1", "year": 2000, "duration": 180.5}),
                json!({"song_id": null, "year": 0, "duration": null}),
            ]
        );
    }

    #[test]
    fn test_dictionary_values() {
        let dict: DictionaryArray<arrow::datatypes::UInt16Type> =
            vec!["2018", "2018", "2019"].into_iter().collect();
        assert_eq!(arrow_array_to_json(&dict, 2).unwrap(), json!("2019"));
    }
}
