use crate::application::interaction::{
    drop_duration_minutes, DragController, DragEdge, GestureOutcome, InteractionError,
    PointerCapture, SaveRequest,
};
use crate::domain::calendar::{week_dates, week_start, LocalCalendar};
use crate::domain::conflicts::{find_conflicts, ConflictEntry};
use crate::domain::layout::{layout_blocks, BlockGeometry};
use crate::domain::models::{
    BlockChange, BlockStatus, ChangeOperation, TimeBlock, UnscheduledTask,
};
use crate::domain::time::{
    format_hour_label, format_time_label, Interval, TimeGrid, DAY_MINUTES,
};
use crate::infrastructure::block_store::BlockStore;
use crate::infrastructure::error::InfraError;
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

pub const DAILY_SLOT_MINUTES: i32 = 30;
pub const REMOVE_CONFIRMATION: &str = "Remove this time block? (Task will not be deleted)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    Daily,
    Weekly,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewSettings {
    pub grid: TimeGrid,
    pub default_drop_minutes: i32,
    pub max_drop_minutes: i32,
    pub week_start_hour: u32,
    pub week_end_hour: u32,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            grid: TimeGrid::default(),
            default_drop_minutes: 60,
            max_drop_minutes: 240,
            week_start_hour: 6,
            week_end_hour: 23,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct BlockCache {
    blocks: BTreeMap<String, TimeBlock>,
}

impl BlockCache {
    pub fn replace_range(&mut self, start: NaiveDate, end: NaiveDate, blocks: Vec<TimeBlock>) {
        self.blocks
            .retain(|_, block| !(start..=end).contains(&block.scheduled_date));
        self.blocks
            .extend(blocks.into_iter().map(|block| (block.id.clone(), block)));
    }

    pub fn upsert(&mut self, block: TimeBlock) {
        self.blocks.insert(block.id.clone(), block);
    }

    pub fn remove(&mut self, block_id: &str) -> Option<TimeBlock> {
        self.blocks.remove(block_id)
    }

    pub fn get(&self, block_id: &str) -> Option<&TimeBlock> {
        self.blocks.get(block_id)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimeBlock> {
        self.blocks.values()
    }
}

#[derive(Debug, Clone)]
struct PendingEntry {
    token: u64,
    block: TimeBlock,
}

#[derive(Debug, Default, Clone)]
pub struct Overlay {
    preview: Option<TimeBlock>,
    pending: HashMap<String, PendingEntry>,
}

impl Overlay {
    pub fn preview(&self) -> Option<&TimeBlock> {
        self.preview.as_ref()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, block_id: &str) -> bool {
        self.pending.contains_key(block_id)
    }

    fn resolve<'a>(&'a self, block: &'a TimeBlock) -> &'a TimeBlock {
        if let Some(preview) = self.preview.as_ref().filter(|preview| preview.id == block.id) {
            return preview;
        }
        self.pending
            .get(&block.id)
            .map(|entry| &entry.block)
            .unwrap_or(block)
    }

    fn supersede(&mut self, block_id: &str) -> bool {
        self.pending.remove(block_id).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: u64,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DropTarget {
    pub date: NaiveDate,
    pub minutes: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slot {
    pub label: String,
    pub target: DropTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacedBlock {
    pub block: TimeBlock,
    pub geometry: BlockGeometry,
    pub pending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyPanel {
    pub date: NaiveDate,
    pub is_today: bool,
    pub slots: Vec<Slot>,
    pub blocks: Vec<PlacedBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourRow {
    pub hour: u32,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayColumn {
    pub date: NaiveDate,
    pub is_today: bool,
    pub blocks: Vec<PlacedBlock>,
    pub overflow: Vec<TimeBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub total_blocks: usize,
    pub total_planned_minutes: i32,
    pub areas: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyGrid {
    pub week_start: NaiveDate,
    pub hours: Vec<HourRow>,
    pub days: Vec<DayColumn>,
    pub summary: Vec<DaySummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalPrompt {
    pub block_id: String,
    pub task_name: String,
    pub message: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingSave {
    pub token: u64,
    pub request: SaveRequest,
}

#[derive(Debug)]
pub struct SaveResult {
    pub token: u64,
    pub block_id: String,
    pub outcome: Result<TimeBlock, InfraError>,
}

impl PendingSave {
    pub fn block_id(&self) -> &str {
        &self.request.block_id
    }

    pub async fn execute<S>(&self, store: &S) -> SaveResult
    where
        S: BlockStore + ?Sized,
    {
        let request = &self.request;
        let outcome = match &request.estimate {
            Some(estimate) => {
                store
                    .resize_block(&request.block_id, &request.patch, Some(estimate))
                    .await
            }
            None => store.update_block(&request.block_id, &request.patch).await,
        };
        SaveResult {
            token: self.token,
            block_id: request.block_id.clone(),
            outcome,
        }
    }
}

pub fn summarize_week(week_start: NaiveDate, blocks: &[TimeBlock]) -> Vec<DaySummary> {
    week_dates(week_start)
        .into_iter()
        .map(|date| {
            let live = blocks
                .iter()
                .filter(|block| block.scheduled_date == date)
                .filter(|block| block.status != BlockStatus::Cancelled)
                .collect::<Vec<_>>();
            let areas = live
                .iter()
                .map(|block| block.area.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            DaySummary {
                date,
                total_blocks: live.len(),
                total_planned_minutes: live
                    .iter()
                    .filter_map(|block| block.planned_duration_minutes().ok())
                    .sum(),
                areas,
            }
        })
        .collect()
}

pub struct ScheduleView<S: BlockStore> {
    store: Arc<S>,
    calendar: LocalCalendar,
    settings: ViewSettings,
    mode: ViewMode,
    anchor: NaiveDate,
    cache: BlockCache,
    overlay: Overlay,
    controller: DragController,
    changes: broadcast::Receiver<BlockChange>,
    unscheduled: Vec<UnscheduledTask>,
    pending_removal: Option<String>,
    notifications: Vec<Notification>,
    next_token: u64,
    next_notification_id: u64,
}

impl<S: BlockStore> ScheduleView<S> {
    pub fn new(
        store: Arc<S>,
        calendar: LocalCalendar,
        settings: ViewSettings,
        mode: ViewMode,
    ) -> Self {
        let changes = store.subscribe();
        let anchor = calendar.today();
        Self {
            store,
            calendar,
            settings,
            mode,
            anchor,
            cache: BlockCache::default(),
            overlay: Overlay::default(),
            controller: DragController::new(settings.grid),
            changes,
            unscheduled: Vec::new(),
            pending_removal: None,
            notifications: Vec::new(),
            next_token: 0,
            next_notification_id: 0,
        }
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn anchor_date(&self) -> NaiveDate {
        self.anchor
    }

    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn controller(&self) -> &DragController {
        &self.controller
    }

    pub fn unscheduled_tasks(&self) -> &[UnscheduledTask] {
        &self.unscheduled
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn dismiss_notification(&mut self, id: u64) {
        self.notifications.retain(|notification| notification.id != id);
    }

    pub fn visible_range(&self) -> (NaiveDate, NaiveDate) {
        match self.mode {
            ViewMode::Daily => (self.anchor, self.anchor),
            ViewMode::Weekly => {
                let start = week_start(self.anchor);
                (start, start + Duration::days(6))
            }
        }
    }

    pub async fn refresh(&mut self) -> Result<(), InfraError> {
        let (start, end) = self.visible_range();
        let blocks = self.store.fetch_blocks_for_range(start, end).await?;
        self.cache.replace_range(start, end, blocks);
        self.unscheduled = self.store.fetch_unscheduled_tasks(None).await?;
        Ok(())
    }

    pub async fn go_previous(&mut self) -> Result<(), InfraError> {
        self.anchor -= self.step();
        self.refresh().await
    }

    pub async fn go_next(&mut self) -> Result<(), InfraError> {
        self.anchor += self.step();
        self.refresh().await
    }

    pub async fn go_today(&mut self) -> Result<(), InfraError> {
        self.anchor = self.calendar.today();
        self.refresh().await
    }

    pub async fn switch_mode(&mut self, mode: ViewMode) -> Result<(), InfraError> {
        self.mode = mode;
        self.refresh().await
    }

    fn step(&self) -> Duration {
        match self.mode {
            ViewMode::Daily => Duration::days(1),
            ViewMode::Weekly => Duration::days(7),
        }
    }

    pub fn effective_blocks(&self, date: NaiveDate) -> Vec<TimeBlock> {
        self.cache
            .iter()
            .map(|block| self.overlay.resolve(block))
            .filter(|block| block.scheduled_date == date)
            .cloned()
            .collect()
    }

    fn effective_block(&self, block_id: &str) -> Option<TimeBlock> {
        self.cache
            .get(block_id)
            .map(|block| self.overlay.resolve(block).clone())
    }

    fn place(&self, blocks: Vec<TimeBlock>) -> Vec<PlacedBlock> {
        let geometry = layout_blocks(&blocks, &self.settings.grid)
            .into_iter()
            .map(|geometry| (geometry.block_id.clone(), geometry))
            .collect::<HashMap<_, _>>();
        blocks
            .into_iter()
            .filter_map(|block| {
                let geometry = geometry.get(&block.id)?.clone();
                let pending = self.overlay.is_pending(&block.id);
                Some(PlacedBlock {
                    block,
                    geometry,
                    pending,
                })
            })
            .collect()
    }

    pub fn daily_panel(&self) -> DailyPanel {
        let grid = &self.settings.grid;
        let slot_count = DAY_MINUTES / DAILY_SLOT_MINUTES;
        let slots = (0..slot_count)
            .map(|index| {
                let minutes =
                    (grid.anchor_minutes + index * DAILY_SLOT_MINUTES).rem_euclid(DAY_MINUTES);
                Slot {
                    label: format_time_label(minutes),
                    target: DropTarget {
                        date: self.anchor,
                        minutes,
                    },
                }
            })
            .collect();

        DailyPanel {
            date: self.anchor,
            is_today: self.calendar.is_today(self.anchor),
            slots,
            blocks: self.place(self.effective_blocks(self.anchor)),
        }
    }

    pub fn weekly_grid(&self) -> WeeklyGrid {
        let start = week_start(self.anchor);
        let first_visible = (self.settings.week_start_hour * 60) as i32;
        let hours = (self.settings.week_start_hour..=self.settings.week_end_hour)
            .map(|hour| HourRow {
                hour,
                label: format_hour_label(hour),
            })
            .collect();

        let days = week_dates(start)
            .into_iter()
            .map(|date| {
                let (visible, overflow): (Vec<_>, Vec<_>) = self
                    .effective_blocks(date)
                    .into_iter()
                    .partition(|block| {
                        block
                            .interval()
                            .map(|interval| interval.start >= first_visible)
                            .unwrap_or(true)
                    });
                DayColumn {
                    date,
                    is_today: self.calendar.is_today(date),
                    blocks: self.place(visible),
                    overflow,
                }
            })
            .collect();

        WeeklyGrid {
            week_start: start,
            hours,
            days,
            summary: self.weekly_summary(),
        }
    }

    pub fn weekly_summary(&self) -> Vec<DaySummary> {
        let start = week_start(self.anchor);
        let blocks = week_dates(start)
            .into_iter()
            .flat_map(|date| self.effective_blocks(date))
            .collect::<Vec<_>>();
        summarize_week(start, &blocks)
    }

    pub fn begin_gesture(
        &mut self,
        block_id: &str,
        edge: DragEdge,
        pointer_y: f64,
        capture: PointerCapture,
    ) -> Result<(), InteractionError> {
        let block = self
            .effective_block(block_id)
            .ok_or_else(|| InteractionError::UnknownBlock(block_id.to_string()))?;
        self.controller.begin(&block, edge, pointer_y, capture)?;
        self.overlay.preview = Some(block);
        Ok(())
    }

    pub fn pointer_move(&mut self, pointer_y: f64) -> Option<Interval> {
        let interval = self.controller.pointer_move(pointer_y)?;
        self.refresh_preview();
        Some(interval)
    }

    pub fn hover_date(&mut self, date: NaiveDate) -> bool {
        let moved = self.controller.hover_date(date);
        if moved {
            self.refresh_preview();
        }
        moved
    }

    fn refresh_preview(&mut self) {
        let Some(active) = self.controller.active() else {
            return;
        };
        let mut preview = active.block.clone();
        preview.scheduled_date = active.target_date;
        match preview.with_interval(active.preview) {
            Ok(block) => self.overlay.preview = Some(block),
            Err(error) => log::warn!("preview for block {} not shown: {error}", preview.id),
        }
    }

    /// Ends the gesture. The returned save must be executed and its result
    /// handed back through [`ScheduleView::apply_save_result`].
    pub fn end_gesture(&mut self, pointer_y: f64) -> Option<PendingSave> {
        let outcome = self.controller.finish(pointer_y);
        self.track_outcome(outcome)
    }

    pub fn capture_lost(&mut self) -> Option<PendingSave> {
        let outcome = self.controller.capture_lost();
        self.track_outcome(outcome)
    }

    fn track_outcome(&mut self, outcome: Option<GestureOutcome>) -> Option<PendingSave> {
        self.overlay.preview = None;
        match outcome? {
            GestureOutcome::Unchanged { block_id } => {
                log::debug!("gesture on block {block_id} left it unchanged");
                None
            }
            GestureOutcome::Commit(request) => {
                self.next_token += 1;
                let token = self.next_token;
                self.overlay.pending.insert(
                    request.block_id.clone(),
                    PendingEntry {
                        token,
                        block: request.updated.clone(),
                    },
                );
                Some(PendingSave { token, request })
            }
        }
    }

    /// Folds a finished save back in. Results for writes that a push or a
    /// newer gesture already replaced change nothing on screen.
    pub fn apply_save_result(&mut self, result: SaveResult) {
        let current = self
            .overlay
            .pending
            .get(&result.block_id)
            .is_some_and(|entry| entry.token == result.token);

        match result.outcome {
            Ok(block) if current => {
                self.overlay.pending.remove(&result.block_id);
                self.cache.upsert(block);
            }
            Ok(_) => {
                log::debug!("ignoring superseded save for block {}", result.block_id);
            }
            Err(error) => {
                if current {
                    self.overlay.pending.remove(&result.block_id);
                }
                log::error!("saving block {} failed: {error}", result.block_id);
                self.notify(format!("Failed to update time block: {error}"));
            }
        }
    }

    pub fn apply_change(&mut self, change: BlockChange) {
        let block_id = change.block.id.clone();
        if self.overlay.supersede(&block_id) {
            log::debug!("push for block {block_id} superseded a pending save");
        }
        match change.operation {
            ChangeOperation::Insert | ChangeOperation::Update => {
                self.unscheduled
                    .retain(|task| task.task_id != change.block.task_id);
                self.cache.upsert(change.block);
            }
            ChangeOperation::Delete => {
                self.cache.remove(&block_id);
            }
        }
    }

    pub async fn sync_changes(&mut self) -> Result<usize, InfraError> {
        let mut applied = 0;
        loop {
            match self.changes.try_recv() {
                Ok(change) => {
                    self.apply_change(change);
                    applied += 1;
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    log::warn!("change feed lagged by {skipped} events; re-reading");
                    self.refresh().await?;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        Ok(applied)
    }

    pub async fn drop_task(&mut self, task_id: &str, target: DropTarget) -> Option<TimeBlock> {
        let task = self
            .unscheduled
            .iter()
            .find(|task| task.task_id == task_id);
        let duration = drop_duration_minutes(
            task,
            self.settings.default_drop_minutes,
            self.settings.max_drop_minutes,
        );
        let start = self.settings.grid.snap(target.minutes);
        let end = (start + duration).min(self.settings.grid.latest_end());
        let interval = match Interval::new(start, end) {
            Ok(interval) => interval,
            Err(error) => {
                self.notify(format!("No room to schedule at that time: {error}"));
                return None;
            }
        };
        self.create_block(task_id, target.date, interval).await
    }

    pub async fn schedule_task(
        &mut self,
        task_id: &str,
        date: NaiveDate,
        interval: Interval,
    ) -> Option<TimeBlock> {
        self.create_block(task_id, date, interval).await
    }

    async fn create_block(
        &mut self,
        task_id: &str,
        date: NaiveDate,
        interval: Interval,
    ) -> Option<TimeBlock> {
        match self.store.create_block(task_id, date, interval).await {
            Ok(block) => {
                self.unscheduled.retain(|task| task.task_id != block.task_id);
                self.cache.upsert(block.clone());
                Some(block)
            }
            Err(error) => {
                log::error!("creating block for task {task_id} failed: {error}");
                self.notify(format!("Failed to schedule task: {error}"));
                None
            }
        }
    }

    pub async fn preview_conflicts(
        &self,
        date: NaiveDate,
        interval: Interval,
        exclude_id: Option<&str>,
    ) -> Result<Vec<ConflictEntry>, InfraError> {
        let blocks = self.store.fetch_blocks_for_date(date).await?;
        Ok(find_conflicts(interval, date, &blocks, exclude_id))
    }

    pub fn request_remove(&mut self, block_id: &str) -> Option<RemovalPrompt> {
        let block = self.effective_block(block_id)?;
        self.pending_removal = Some(block.id.clone());
        Some(RemovalPrompt {
            block_id: block.id,
            task_name: block.task_name,
            message: REMOVE_CONFIRMATION,
        })
    }

    pub fn cancel_remove(&mut self) {
        self.pending_removal = None;
    }

    pub async fn confirm_remove(&mut self) -> bool {
        let Some(block_id) = self.pending_removal.take() else {
            return false;
        };
        match self.store.delete_block(&block_id).await {
            Ok(()) => {
                self.overlay.supersede(&block_id);
                self.cache.remove(&block_id);
                true
            }
            Err(error) => {
                log::error!("removing block {block_id} failed: {error}");
                self.notify(format!("Failed to remove time block: {error}"));
                false
            }
        }
    }

    pub async fn set_block_status(
        &mut self,
        block_id: &str,
        status: BlockStatus,
        actual_duration_minutes: Option<i32>,
    ) -> Option<TimeBlock> {
        match self
            .store
            .update_block_status(block_id, status, actual_duration_minutes)
            .await
        {
            Ok(block) => {
                self.cache.upsert(block.clone());
                Some(block)
            }
            Err(error) => {
                log::error!("changing status of block {block_id} failed: {error}");
                self.notify(format!("Failed to update block status: {error}"));
                None
            }
        }
    }

    fn notify(&mut self, message: String) {
        self.next_notification_id += 1;
        self.notifications.push(Notification {
            id: self.next_notification_id,
            message,
        });
    }
}
