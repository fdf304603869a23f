use crate::domain::models::{
    BlockChange, BlockPatch, BlockStatus, ChangeOperation, TaskEstimate, TimeBlock,
    UnscheduledTask,
};
use crate::domain::time::Interval;
use crate::infrastructure::block_store::{
    normalized_id, sort_blocks, BlockStore, CHANGE_FEED_CAPACITY,
};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use url::Url;

const BLOCKS_TABLE: &str = "task_time_blocks";
const TASKS_TABLE: &str = "tasks";
const CALENDAR_VIEW_RPC: &str = "get_calendar_view";
const UNSCHEDULED_TASKS_RPC: &str = "get_unscheduled_tasks";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestConfig {
    pub base_url: Url,
    pub api_key: String,
    pub access_token: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct BlockRecord {
    id: String,
    scheduled_date: NaiveDate,
}

#[derive(Debug, Serialize)]
struct CalendarViewParams<'a> {
    p_user_id: &'a str,
    p_start_date: NaiveDate,
    p_end_date: NaiveDate,
}

#[derive(Debug, Serialize)]
struct UnscheduledParams<'a> {
    p_user_id: &'a str,
    p_area: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct NewBlockRecord<'a> {
    user_id: &'a str,
    task_id: &'a str,
    scheduled_date: NaiveDate,
    start_time: String,
    end_time: String,
    planned_duration_minutes: i32,
    status: BlockStatus,
}

#[derive(Debug, Serialize)]
struct BlockUpdateRecord<'a> {
    #[serde(flatten)]
    patch: &'a BlockPatch,
    #[serde(skip_serializing_if = "Option::is_none")]
    planned_duration_minutes: Option<i32>,
}

#[derive(Debug, Serialize)]
struct StatusRecord {
    status: BlockStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    actual_duration_minutes: Option<i32>,
}

#[derive(Debug, Serialize)]
struct EstimateRecord {
    hours_projected: f64,
}

#[derive(Debug, Clone)]
pub struct RestBlockStore {
    client: Client,
    config: RestConfig,
    changes: broadcast::Sender<BlockChange>,
}

impl RestBlockStore {
    pub fn new(config: RestConfig) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            client: Client::new(),
            config,
            changes,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, InfraError> {
        let mut url = self.config.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("backend base URL cannot be a base".to_string())
            })?;
            path.pop_if_empty();
            path.push("rest");
            path.push("v1");
            path.extend(segments);
        }
        Ok(url)
    }

    fn rpc_url(&self, function: &str) -> Result<Url, InfraError> {
        self.endpoint(&["rpc", function])
    }

    fn row_url(&self, table: &str, id: &str) -> Result<Url, InfraError> {
        let mut url = self.endpoint(&[table])?;
        url.query_pairs_mut().append_pair("id", &format!("eq.{id}"));
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.config.access_token)
            .header("apikey", &self.config.api_key)
    }

    fn returning(request: RequestBuilder) -> RequestBuilder {
        request.header("Prefer", "return=representation")
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        action: &str,
    ) -> Result<T, InfraError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|error| {
                InfraError::Persistence(format!("network error while {action}: {error}"))
            })?;
        let status = response.status();
        let body = response.text().await?;
        decode_response(status, &body, action)
    }

    async fn fetch_view(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TimeBlock>, InfraError> {
        let params = CalendarViewParams {
            p_user_id: &self.config.user_id,
            p_start_date: start,
            p_end_date: end,
        };
        let request = self.client.post(self.rpc_url(CALENDAR_VIEW_RPC)?).json(&params);
        let mut blocks: Vec<TimeBlock> = self.send(request, "reading calendar view").await?;
        sort_blocks(&mut blocks);
        Ok(blocks)
    }

    async fn load_block(&self, record: &BlockRecord) -> Result<TimeBlock, InfraError> {
        self.fetch_view(record.scheduled_date, record.scheduled_date)
            .await?
            .into_iter()
            .find(|block| block.id == record.id)
            .ok_or_else(|| InfraError::NotFound(format!("block {}", record.id)))
    }

    async fn patch_block<B: Serialize + Sync>(
        &self,
        block_id: &str,
        body: &B,
        action: &str,
    ) -> Result<TimeBlock, InfraError> {
        let block_id = normalized_id(block_id)
            .ok_or_else(|| InfraError::InvalidConfig("block id is required".to_string()))?;
        let request = Self::returning(
            self.client
                .patch(self.row_url(BLOCKS_TABLE, &block_id)?)
                .json(body),
        );
        let records: Vec<BlockRecord> = self.send(request, action).await?;
        let record = single_record(records, &block_id)?;
        let block = self.load_block(&record).await?;
        self.publish(ChangeOperation::Update, &block);
        Ok(block)
    }

    async fn current_block(&self, block_id: &str) -> Result<TimeBlock, InfraError> {
        let block_id = normalized_id(block_id)
            .ok_or_else(|| InfraError::InvalidConfig("block id is required".to_string()))?;
        let lookup = self
            .client
            .get(self.row_url(BLOCKS_TABLE, &block_id)?)
            .query(&[("select", "id,scheduled_date")]);
        let records: Vec<BlockRecord> = self.send(lookup, "looking up time block").await?;
        let record = single_record(records, &block_id)?;
        self.load_block(&record).await
    }

    async fn write_times(
        &self,
        current: &TimeBlock,
        patch: &BlockPatch,
        action: &str,
    ) -> Result<TimeBlock, InfraError> {
        let body = update_record(current, patch)?;
        self.patch_block(&current.id, &body, action).await
    }

    fn publish(&self, operation: ChangeOperation, block: &TimeBlock) {
        let _ = self.changes.send(BlockChange {
            operation,
            block: block.clone(),
        });
    }
}

fn decode_response<T: DeserializeOwned>(
    status: StatusCode,
    body: &str,
    action: &str,
) -> Result<T, InfraError> {
    if !status.is_success() {
        let message = if body.trim().is_empty() {
            format!("backend error while {action}: http {}", status.as_u16())
        } else {
            format!("backend error while {action}: http {}; body={body}", status.as_u16())
        };
        return Err(InfraError::Persistence(message));
    }
    let body = if body.trim().is_empty() { "null" } else { body };
    serde_json::from_str(body).map_err(|error| {
        InfraError::Persistence(format!("invalid payload while {action}: {error}; body={body}"))
    })
}

// Time edits also rewrite `planned_duration_minutes` so the stored row
// stays consistent with its interval.
fn update_record<'a>(
    current: &TimeBlock,
    patch: &'a BlockPatch,
) -> Result<BlockUpdateRecord<'a>, InfraError> {
    let planned_duration_minutes = if patch.start_time.is_some() || patch.end_time.is_some() {
        Some(patch.apply_to(current).interval()?.duration())
    } else {
        None
    };
    Ok(BlockUpdateRecord {
        patch,
        planned_duration_minutes,
    })
}

fn restore_patch(original: &TimeBlock) -> BlockPatch {
    BlockPatch {
        start_time: Some(original.start_time.clone()),
        end_time: Some(original.end_time.clone()),
        date: Some(original.scheduled_date),
    }
}

fn single_record(records: Vec<BlockRecord>, block_id: &str) -> Result<BlockRecord, InfraError> {
    records
        .into_iter()
        .next()
        .ok_or_else(|| InfraError::NotFound(format!("block {block_id}")))
}

#[async_trait]
impl BlockStore for RestBlockStore {
    async fn fetch_blocks_for_date(&self, date: NaiveDate) -> Result<Vec<TimeBlock>, InfraError> {
        self.fetch_view(date, date).await
    }

    async fn fetch_blocks_for_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TimeBlock>, InfraError> {
        self.fetch_view(start, end).await
    }

    async fn create_block(
        &self,
        task_id: &str,
        date: NaiveDate,
        interval: Interval,
    ) -> Result<TimeBlock, InfraError> {
        let task_id = normalized_id(task_id)
            .ok_or_else(|| InfraError::InvalidConfig("task id is required".to_string()))?;
        let record = NewBlockRecord {
            user_id: &self.config.user_id,
            task_id: &task_id,
            scheduled_date: date,
            start_time: interval.start_time()?,
            end_time: interval.end_time()?,
            planned_duration_minutes: interval.duration(),
            status: BlockStatus::Scheduled,
        };
        let request =
            Self::returning(self.client.post(self.endpoint(&[BLOCKS_TABLE])?).json(&record));
        let records: Vec<BlockRecord> = self.send(request, "creating time block").await?;
        let created = single_record(records, "new")?;
        let block = self.load_block(&created).await?;
        self.publish(ChangeOperation::Insert, &block);
        Ok(block)
    }

    async fn update_block(
        &self,
        block_id: &str,
        patch: &BlockPatch,
    ) -> Result<TimeBlock, InfraError> {
        let current = self.current_block(block_id).await?;
        self.write_times(&current, patch, "updating time block").await
    }

    async fn delete_block(&self, block_id: &str) -> Result<(), InfraError> {
        let block = self.current_block(block_id).await?;
        let request = self.client.delete(self.row_url(BLOCKS_TABLE, &block.id)?);
        let _: Option<serde_json::Value> = self.send(request, "deleting time block").await?;
        self.publish(ChangeOperation::Delete, &block);
        Ok(())
    }

    async fn update_task_estimate(&self, estimate: &TaskEstimate) -> Result<(), InfraError> {
        let task_id = normalized_id(&estimate.task_id)
            .ok_or_else(|| InfraError::InvalidConfig("task id is required".to_string()))?;
        let body = EstimateRecord {
            hours_projected: estimate.hours_projected.max(0.0),
        };
        let request = self.client.patch(self.row_url(TASKS_TABLE, &task_id)?).json(&body);
        let _: Option<serde_json::Value> = self.send(request, "updating task estimate").await?;
        Ok(())
    }

    // The backend has no multi-table write, so a failed estimate puts the
    // block back before the error is returned.
    async fn resize_block(
        &self,
        block_id: &str,
        patch: &BlockPatch,
        estimate: Option<&TaskEstimate>,
    ) -> Result<TimeBlock, InfraError> {
        let original = self.current_block(block_id).await?;
        let mut resized = self.write_times(&original, patch, "resizing time block").await?;
        let Some(estimate) = estimate else {
            return Ok(resized);
        };

        if let Err(error) = self.update_task_estimate(estimate).await {
            let restore = restore_patch(&original);
            if let Err(rollback) = self
                .write_times(&resized, &restore, "restoring time block")
                .await
            {
                log::error!(
                    "block {} left at {}-{} after failed resize: {rollback}",
                    original.id,
                    resized.start_time,
                    resized.end_time
                );
            }
            return Err(error);
        }
        resized.hours_projected = Some(estimate.hours_projected.max(0.0));
        Ok(resized)
    }

    async fn update_block_status(
        &self,
        block_id: &str,
        status: BlockStatus,
        actual_duration_minutes: Option<i32>,
    ) -> Result<TimeBlock, InfraError> {
        let body = StatusRecord {
            status,
            actual_duration_minutes,
        };
        self.patch_block(block_id, &body, "updating time block status").await
    }

    async fn fetch_unscheduled_tasks(
        &self,
        area: Option<&str>,
    ) -> Result<Vec<UnscheduledTask>, InfraError> {
        let params = UnscheduledParams {
            p_user_id: &self.config.user_id,
            p_area: area.map(str::trim).filter(|value| !value.is_empty()),
        };
        let request = self.client.post(self.rpc_url(UNSCHEDULED_TASKS_RPC)?).json(&params);
        self.send(request, "reading unscheduled tasks").await
    }

    fn subscribe(&self) -> broadcast::Receiver<BlockChange> {
        self.changes.subscribe()
    }
}
