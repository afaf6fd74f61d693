//! Typed, range-checked node properties and their automation queues.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::automation::Automator;
use crate::error::{EngineError, Result};
use crate::node::BlockInfo;

/// Integer key identifying a property on a node. Processor-defined
/// properties use non-negative slots; negative slots are shared by every node.
pub type Slot = i32;

/// Properties every node carries.
pub mod slots {
    use super::Slot;

    /// Gain applied to every output sample after `process`.
    pub const MUL: Slot = -1;
    /// Offset added to every output sample after `MUL`.
    pub const ADD: Slot = -2;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Int(i32),
    Float(f32),
    Double(f64),
    Float3([f32; 3]),
    Float6([f32; 6]),
    FloatArray(Vec<f32>),
    String(String),
    Buffer(Option<Arc<[f32]>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    Int,
    Float,
    Double,
    Float3,
    Float6,
    FloatArray,
    String,
    Buffer,
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Int(_) => PropertyKind::Int,
            PropertyValue::Float(_) => PropertyKind::Float,
            PropertyValue::Double(_) => PropertyKind::Double,
            PropertyValue::Float3(_) => PropertyKind::Float3,
            PropertyValue::Float6(_) => PropertyKind::Float6,
            PropertyValue::FloatArray(_) => PropertyKind::FloatArray,
            PropertyValue::String(_) => PropertyKind::String,
            PropertyValue::Buffer(_) => PropertyKind::Buffer,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(v) => Some(f64::from(*v)),
            PropertyValue::Float(v) => Some(f64::from(*v)),
            PropertyValue::Double(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Property {
    slot: Slot,
    value: PropertyValue,
    default: PropertyValue,
    range: Option<(f64, f64)>,
    length: Option<(usize, usize)>,
    a_rate: bool,
    read_only: bool,
    dirty: bool,
    modified: bool,
    automators: Vec<Automator>,
    time: f64,
    block_value: f64,
    values: Vec<f64>,
    a_rate_active: bool,
}

impl Property {
    pub fn new(default: PropertyValue) -> Self {
        let block_value = default.as_f64().unwrap_or_default();
        Self {
            slot: 0,
            value: default.clone(),
            default,
            range: None,
            length: None,
            a_rate: false,
            read_only: false,
            dirty: true,
            modified: false,
            automators: Vec::new(),
            time: 0.0,
            block_value,
            values: Vec::new(),
            a_rate_active: false,
        }
    }

    pub fn int(default: i32) -> Self {
        Self::new(PropertyValue::Int(default))
    }

    pub fn float(default: f32) -> Self {
        Self::new(PropertyValue::Float(default))
    }

    pub fn double(default: f64) -> Self {
        Self::new(PropertyValue::Double(default))
    }

    pub fn float3(default: [f32; 3]) -> Self {
        Self::new(PropertyValue::Float3(default))
    }

    pub fn float6(default: [f32; 6]) -> Self {
        Self::new(PropertyValue::Float6(default))
    }

    pub fn float_array(default: Vec<f32>) -> Self {
        Self::new(PropertyValue::FloatArray(default))
    }

    pub fn string(default: impl Into<String>) -> Self {
        Self::new(PropertyValue::String(default.into()))
    }

    pub fn buffer() -> Self {
        Self::new(PropertyValue::Buffer(None))
    }

    /// Inclusive numeric range. Applies to scalar values and to every element
    /// of a float array.
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    /// Inclusive length bounds for float arrays.
    pub fn with_length_range(mut self, min: usize, max: usize) -> Self {
        self.length = Some((min, max));
        self
    }

    /// Allows per-sample evaluation while automation is active.
    pub fn a_rate(mut self) -> Self {
        self.a_rate = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub fn kind(&self) -> PropertyKind {
        self.value.kind()
    }

    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    pub fn default_value(&self) -> &PropertyValue {
        &self.default
    }

    pub fn range(&self) -> Option<(f64, f64)> {
        self.range
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn allows_a_rate(&self) -> bool {
        self.a_rate
    }

    pub fn is_automatable(&self) -> bool {
        matches!(self.kind(), PropertyKind::Float | PropertyKind::Double)
    }

    /// Start of the most recently resolved block.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn automator_count(&self) -> usize {
        self.automators.len()
    }

    /// Whether the value changed since the previous block, either by a write
    /// or because automation is driving it.
    pub fn was_modified(&self) -> bool {
        self.modified
    }

    /// True when this block carries per-sample values.
    pub fn needs_a_rate(&self) -> bool {
        self.a_rate_active
    }

    /// Value for the current block, as resolved at block start.
    pub fn block_value(&self) -> f64 {
        self.block_value
    }

    /// Value at `sample` within the current block. Falls back to the block
    /// value when the property is not running at a-rate.
    pub fn sample_value(&self, sample: usize) -> f64 {
        if self.a_rate_active {
            self.values.get(sample).copied().unwrap_or(self.block_value)
        } else {
            self.block_value
        }
    }

    pub fn as_int(&self) -> i32 {
        match self.value {
            PropertyValue::Int(v) => v,
            _ => self.block_value as i32,
        }
    }

    pub fn as_float(&self) -> f32 {
        self.block_value as f32
    }

    pub fn as_float3(&self) -> [f32; 3] {
        match self.value {
            PropertyValue::Float3(v) => v,
            _ => [0.0; 3],
        }
    }

    pub fn as_float6(&self) -> [f32; 6] {
        match self.value {
            PropertyValue::Float6(v) => v,
            _ => [0.0; 6],
        }
    }

    pub fn as_float_array(&self) -> &[f32] {
        match &self.value {
            PropertyValue::FloatArray(v) => v,
            _ => &[],
        }
    }

    pub fn as_str(&self) -> &str {
        match &self.value {
            PropertyValue::String(v) => v,
            _ => "",
        }
    }

    pub fn as_buffer(&self) -> Option<&Arc<[f32]>> {
        match &self.value {
            PropertyValue::Buffer(v) => v.as_ref(),
            _ => None,
        }
    }

    pub fn set(&mut self, value: PropertyValue) -> Result<()> {
        if self.read_only {
            return Err(EngineError::ReadOnly(self.slot));
        }
        self.validate(&value)?;
        self.assign(value);
        Ok(())
    }

    /// Writes a value on behalf of the owning node, bypassing the read-only
    /// flag.
    pub fn set_internal(&mut self, value: PropertyValue) -> Result<()> {
        self.validate(&value)?;
        self.assign(value);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.automators.clear();
        self.assign(self.default.clone());
    }

    fn assign(&mut self, value: PropertyValue) {
        if self.automators.is_empty() {
            self.block_value = value.as_f64().unwrap_or_default();
        }
        self.value = value;
        self.dirty = true;
    }

    fn validate(&self, value: &PropertyValue) -> Result<()> {
        if value.kind() != self.kind() {
            return Err(EngineError::mismatch(format!(
                "property {} holds {:?}, got {:?}",
                self.slot,
                self.kind(),
                value.kind()
            )));
        }
        if let Some(scalar) = value.as_f64() {
            self.check_range(scalar)?;
        }
        if let PropertyValue::FloatArray(items) = value {
            if let Some((min, max)) = self.length {
                if items.len() < min || items.len() > max {
                    return Err(EngineError::range(format!(
                        "array length {} outside [{min}, {max}] for property {}",
                        items.len(),
                        self.slot
                    )));
                }
            }
            for item in items {
                self.check_range(f64::from(*item))?;
            }
        }
        Ok(())
    }

    fn check_range(&self, value: f64) -> Result<()> {
        match self.range {
            Some((min, max)) if value < min || value > max || value.is_nan() => {
                Err(EngineError::range(format!(
                    "{value} outside [{min}, {max}] for property {}",
                    self.slot
                )))
            }
            _ => Ok(()),
        }
    }

    fn clamp(&self, value: f64) -> f64 {
        match self.range {
            Some((min, max)) => value.clamp(min, max),
            None => value,
        }
    }

    fn plain_value(&self) -> f64 {
        self.value.as_f64().unwrap_or_default()
    }

    fn require_automatable(&self) -> Result<()> {
        if self.is_automatable() {
            Ok(())
        } else {
            Err(EngineError::mismatch(format!(
                "property {} of kind {:?} cannot be automated",
                self.slot,
                self.kind()
            )))
        }
    }

    /// Inserts `automator` in time order and restarts it and every later
    /// automator from the value in effect just before each of them.
    pub fn schedule(&mut self, automator: Automator, now: f64) -> Result<()> {
        self.require_automatable()?;
        let start = automator.scheduled_time();
        if start < now || start.is_nan() {
            return Err(EngineError::range(format!(
                "automator scheduled at {start}s is before the current time {now}s"
            )));
        }
        self.retire(now);
        let end = automator.end_time();
        let overlaps = self
            .automators
            .iter()
            .any(|existing| start < existing.end_time() && existing.scheduled_time() < end);
        if overlaps {
            return Err(EngineError::OverlappingAutomators { time: start });
        }
        let index = self
            .automators
            .partition_point(|existing| existing.scheduled_time() <= start);
        self.automators.insert(index, automator);
        self.restart_from(index, now);
        Ok(())
    }

    /// Removes every automator scheduled at or after `at` and holds the value
    /// that was in effect at `at` from then on. Values before `at` are left
    /// as they were: a ramp already under way at `at` is cut there instead of
    /// being dropped.
    pub fn cancel_automators(&mut self, at: f64, now: f64) -> Result<()> {
        self.require_automatable()?;
        if at < now || at.is_nan() {
            return Err(EngineError::range(format!(
                "cannot cancel automation at {at}s, before the current time {now}s"
            )));
        }
        if self.automators.is_empty() {
            return Ok(());
        }
        let held = self.value_at(at);
        self.automators.retain(|automator| automator.starts_before(at));
        for automator in &mut self.automators {
            automator.truncate(at);
        }
        self.automators.push(Automator::set(at, held));
        let last = self.automators.len() - 1;
        self.restart_from(last, now);
        Ok(())
    }

    fn restart_from(&mut self, index: usize, now: f64) {
        let (mut value, mut time) = match index.checked_sub(1) {
            Some(previous) => {
                let previous = &self.automators[previous];
                (previous.final_value(), previous.end_time())
            }
            None => (self.plain_value(), now),
        };
        for automator in &mut self.automators[index..] {
            automator.start(value, time);
            value = automator.final_value();
            time = automator.end_time();
        }
    }

    /// Folds automators that finished before `now` into the plain value.
    fn retire(&mut self, now: f64) {
        let finished = self
            .automators
            .iter()
            .take_while(|automator| automator.end_time() < now)
            .count();
        if finished == 0 {
            return;
        }
        let last = self.clamp(self.automators[finished - 1].final_value());
        self.automators.drain(..finished);
        self.value = match self.value {
            PropertyValue::Float(_) => PropertyValue::Float(last as f32),
            PropertyValue::Double(_) => PropertyValue::Double(last),
            ref other => other.clone(),
        };
        self.dirty = true;
    }

    /// Evaluates the property at absolute time `time` without changing any
    /// state.
    pub fn value_at(&self, time: f64) -> f64 {
        let mut cursor = 0;
        self.clamp(evaluate(&self.automators, self.plain_value(), time, &mut cursor))
    }

    pub(crate) fn tick(&mut self, block: &BlockInfo) {
        self.retire(block.time);
        self.time = block.time;
        self.modified = self.dirty || !self.automators.is_empty();
        self.dirty = false;
        if self.automators.is_empty() {
            self.a_rate_active = false;
            self.block_value = self.plain_value();
            return;
        }
        self.block_value = self.value_at(block.time);
        self.a_rate_active = self.a_rate;
        if !self.a_rate_active {
            return;
        }
        let plain = self.plain_value();
        let range = self.range;
        let step = 1.0 / f64::from(block.sample_rate);
        let Self {
            values, automators, ..
        } = self;
        values.resize(block.block_size, 0.0);
        let mut cursor = 0;
        for (sample, slot) in values.iter_mut().enumerate() {
            let time = block.time + sample as f64 * step;
            let value = evaluate(automators, plain, time, &mut cursor);
            *slot = match range {
                Some((min, max)) => value.clamp(min, max),
                None => value,
            };
        }
    }

    /// Adds a per-sample signal on top of the values resolved for the current
    /// block. The property runs at a-rate for the rest of the block.
    pub(crate) fn add_signal(&mut self, samples: &[f32]) {
        if !self.a_rate_active {
            self.values.clear();
            self.values.resize(samples.len(), self.block_value);
            self.a_rate_active = true;
        }
        let range = self.range;
        for (slot, sample) in self.values.iter_mut().zip(samples) {
            let value = *slot + f64::from(*sample);
            *slot = match range {
                Some((min, max)) => value.clamp(min, max),
                None => value,
            };
        }
        if let Some(first) = self.values.first() {
            self.block_value = *first;
        }
        self.modified = true;
    }
}

/// The first automator that has not ended before `time` supplies the value;
/// past the last one its final value holds. Of several automators scheduled
/// at the same time, the one inserted last wins once that time is reached.
/// `cursor` only moves forward, so ascending times walk the queue once.
fn evaluate(automators: &[Automator], plain: f64, time: f64, cursor: &mut usize) -> f64 {
    while *cursor < automators.len() && automators[*cursor].end_time() < time {
        *cursor += 1;
    }
    while let (Some(current), Some(next)) = (automators.get(*cursor), automators.get(*cursor + 1)) {
        if next.scheduled_time() != current.scheduled_time() || next.scheduled_time() > time {
            break;
        }
        *cursor += 1;
    }
    match automators.get(*cursor) {
        Some(automator) => automator.value(time),
        None => automators
            .last()
            .map(Automator::final_value)
            .unwrap_or(plain),
    }
}

/// Properties of one node keyed by slot.
#[derive(Debug, Clone, Default)]
pub struct PropertyTable {
    entries: BTreeMap<Slot, Property>,
}

impl PropertyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, slot: Slot, property: Property) -> Self {
        self.insert(slot, property);
        self
    }

    pub fn insert(&mut self, slot: Slot, mut property: Property) {
        property.slot = slot;
        self.entries.insert(slot, property);
    }

    pub fn contains(&self, slot: Slot) -> bool {
        self.entries.contains_key(&slot)
    }

    pub fn get(&self, slot: Slot) -> Result<&Property> {
        self.entries
            .get(&slot)
            .ok_or_else(|| EngineError::range(format!("no property in slot {slot}")))
    }

    pub fn get_mut(&mut self, slot: Slot) -> Result<&mut Property> {
        self.entries
            .get_mut(&slot)
            .ok_or_else(|| EngineError::range(format!("no property in slot {slot}")))
    }

    /// Block value of a numeric property, or 0 when the slot is empty.
    pub fn float(&self, slot: Slot) -> f32 {
        self.entries.get(&slot).map_or(0.0, Property::as_float)
    }

    /// Per-sample value of a numeric property, or 0 when the slot is empty.
    pub fn sample(&self, slot: Slot, sample: usize) -> f32 {
        self.entries
            .get(&slot)
            .map_or(0.0, |property| property.sample_value(sample) as f32)
    }

    pub fn were_modified(&self, slots: &[Slot]) -> bool {
        slots.iter().any(|slot| {
            self.entries
                .get(slot)
                .is_some_and(Property::was_modified)
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (Slot, &Property)> + '_ {
        self.entries.iter().map(|(slot, property)| (*slot, property))
    }

    pub(crate) fn tick(&mut self, block: &BlockInfo) {
        for property in self.entries.values_mut() {
            property.tick(block);
        }
    }
}
