use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use notedmark_atoms::media::{ImageRecord, ImageTable};
use notedmark_atoms::AppError;
use std::collections::HashMap;

use crate::backend_error;

fn user_pk(user_id: &str) -> String {
    format!("USER#{}", user_id)
}

fn image_sk(image_id: &str) -> String {
    format!("IMAGE#{}", image_id)
}

fn string_attr(item: &HashMap<String, AttributeValue>, name: &str) -> Option<String> {
    item.get(name).and_then(|v| v.as_s().ok()).map(|s| s.to_string())
}

/// Rebuild a record from one `USER#`/`IMAGE#` item.
pub fn record_from_item(user_id: &str, item: &HashMap<String, AttributeValue>) -> Option<ImageRecord> {
    let sk = string_attr(item, "SK")?;
    let id = sk.strip_prefix("IMAGE#")?.to_string();
    Some(ImageRecord {
        id,
        user_id: user_id.to_string(),
        path: string_attr(item, "path").unwrap_or_default(),
        filename: string_attr(item, "filename").unwrap_or_default(),
        public_url: string_attr(item, "public_url").unwrap_or_default(),
        original_image_id: string_attr(item, "original_image_id"),
        created_at: string_attr(item, "created_at").unwrap_or_default(),
    })
}

/// Image records in a single DynamoDB table keyed `USER#{user_id}` / `IMAGE#{id}`.
pub struct DynamoImageTable {
    client: DynamoClient,
    table_name: String,
}

impl DynamoImageTable {
    pub fn new(client: DynamoClient, table_name: String) -> Self {
        Self { client, table_name }
    }
}

#[async_trait]
impl ImageTable for DynamoImageTable {
    async fn insert(&self, record: &ImageRecord) -> Result<(), AppError> {
        let mut builder = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .item("PK", AttributeValue::S(user_pk(&record.user_id)))
            .item("SK", AttributeValue::S(image_sk(&record.id)))
            .item("path", AttributeValue::S(record.path.clone()))
            .item("filename", AttributeValue::S(record.filename.clone()))
            .item("public_url", AttributeValue::S(record.public_url.clone()))
            .item("created_at", AttributeValue::S(record.created_at.clone()))
            .condition_expression("attribute_not_exists(SK)");

        if let Some(original) = &record.original_image_id {
            builder = builder.item("original_image_id", AttributeValue::S(original.clone()));
        }

        builder.send().await.map_err(backend_error)?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ImageRecord>, AppError> {
        let mut images = Vec::new();
        let mut start_key = None;

        loop {
            let result = self
                .client
                .query()
                .table_name(&self.table_name)
                .key_condition_expression("PK = :pk AND begins_with(SK, :sk_prefix)")
                .expression_attribute_values(":pk", AttributeValue::S(user_pk(user_id)))
                .expression_attribute_values(":sk_prefix", AttributeValue::S("IMAGE#".to_string()))
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(backend_error)?;

            images.extend(result.items().iter().filter_map(|item| record_from_item(user_id, item)));

            match result.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        images.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(images)
    }

    async fn get(&self, user_id: &str, id: &str) -> Result<Option<ImageRecord>, AppError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(user_pk(user_id)))
            .key("SK", AttributeValue::S(image_sk(id)))
            .send()
            .await
            .map_err(backend_error)?;

        Ok(result.item().and_then(|item| record_from_item(user_id, item)))
    }

    async fn delete(&self, user_id: &str, id: &str) -> Result<(), AppError> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(user_pk(user_id)))
            .key("SK", AttributeValue::S(image_sk(id)))
            .send()
            .await
            .map_err(backend_error)?;
        Ok(())
    }
}
