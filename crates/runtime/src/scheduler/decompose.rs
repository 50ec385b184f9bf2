use std::iter;

use uuid::Uuid;

use aevrt_core::{AevError, SegmentMeta, Task, TaskInput, TaskType, Tile, TilePayload};

/// Split `task` into tiles along type-appropriate boundaries.
///
/// Pure and deterministic: identical `(task, tile_size, segment_ms)` always
/// yields identical tiles. The ordered union of the tile payloads reconstructs
/// the input exactly once.
pub fn decompose(task: &Task, tile_size: usize, default_segment_ms: u64) -> Result<Vec<Tile>, AevError> {
    task.validate()?;
    if tile_size == 0 {
        return Err(AevError::InvalidInput("tile_size must be at least 1".into()));
    }

    let task_id = task.id;
    let task_type = task.task_type();
    let tiles = match &task.input {
        TaskInput::Language { text } => split_text(task_id, task_type, text, tile_size),
        TaskInput::Reasoning { prompt } => vec![whole(task_id, task_type, TilePayload::Text {
            text: prompt.clone(),
        })],
        TaskInput::Image { prompt, count } => split_images(task_id, prompt, *count),
        TaskInput::Music { prompt, duration_ms } => {
            let segment_ms = task.constraints.segment_ms.unwrap_or(default_segment_ms);
            if segment_ms == 0 {
                return Err(AevError::InvalidInput("segment length must be positive".into()));
            }
            split_audio(task_id, prompt, *duration_ms, segment_ms)
        }
        TaskInput::Embedding { inputs } => split_items(task_id, inputs, tile_size),
    };
    Ok(tiles)
}

fn whole(task_id: Uuid, task_type: TaskType, payload: TilePayload) -> Tile {
    Tile {
        task_id,
        tile_index: 0,
        task_type,
        payload,
        segment: SegmentMeta::Whole,
    }
}

fn split_text(task_id: Uuid, task_type: TaskType, text: &str, tile_size: usize) -> Vec<Tile> {
    let total = text.chars().count();
    if total <= tile_size {
        return vec![whole(task_id, task_type, TilePayload::Text { text: text.to_string() })];
    }

    // Byte offset of every tile_size-th char, plus the end of the string.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(byte, _)| byte)
        .step_by(tile_size)
        .chain(iter::once(text.len()))
        .collect();

    bounds
        .windows(2)
        .enumerate()
        .map(|(i, w)| {
            let start = i * tile_size;
            let end = (start + tile_size).min(total);
            Tile {
                task_id,
                tile_index: i,
                task_type,
                payload: TilePayload::Text { text: text[w[0]..w[1]].to_string() },
                segment: SegmentMeta::Chars { start, end },
            }
        })
        .collect()
}

fn split_images(task_id: Uuid, prompt: &str, count: u32) -> Vec<Tile> {
    if count <= 1 {
        return vec![whole(task_id, TaskType::Image, TilePayload::Image {
            prompt: prompt.to_string(),
            count,
        })];
    }
    (0..count)
        .map(|index| Tile {
            task_id,
            tile_index: index as usize,
            task_type: TaskType::Image,
            payload: TilePayload::Image { prompt: prompt.to_string(), count: 1 },
            segment: SegmentMeta::Batch { index },
        })
        .collect()
}

fn split_audio(task_id: Uuid, prompt: &str, duration_ms: u64, segment_ms: u64) -> Vec<Tile> {
    if duration_ms <= segment_ms {
        return vec![whole(task_id, TaskType::Music, TilePayload::Audio {
            prompt: prompt.to_string(),
            offset_ms: 0,
            duration_ms,
        })];
    }

    let mut tiles = Vec::with_capacity(duration_ms.div_ceil(segment_ms) as usize);
    let mut offset_ms = 0;
    while offset_ms < duration_ms {
        let length = segment_ms.min(duration_ms - offset_ms);
        tiles.push(Tile {
            task_id,
            tile_index: tiles.len(),
            task_type: TaskType::Music,
            payload: TilePayload::Audio {
                prompt: prompt.to_string(),
                offset_ms,
                duration_ms: length,
            },
            segment: SegmentMeta::Time { offset_ms, duration_ms: length },
        });
        offset_ms += length;
    }
    tiles
}

fn split_items(task_id: Uuid, inputs: &[String], tile_size: usize) -> Vec<Tile> {
    if inputs.len() <= tile_size {
        return vec![whole(task_id, TaskType::Embedding, TilePayload::Embedding {
            inputs: inputs.to_vec(),
        })];
    }
    inputs
        .chunks(tile_size)
        .enumerate()
        .map(|(i, chunk)| {
            let start = i * tile_size;
            Tile {
                task_id,
                tile_index: i,
                task_type: TaskType::Embedding,
                payload: TilePayload::Embedding { inputs: chunk.to_vec() },
                segment: SegmentMeta::Items { start, end: start + chunk.len() },
            }
        })
        .collect()
}
