//! 并行扫描任务划分

use crate::common::PackIndex;
use crate::dpn::Dpn;

/// 一个工作线程负责的 pack 区间 `[start_pack, end_pack)`。
/// `packs_before / tuples_before` 是之前所有任务的累计量，用于计算绝对行号。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CTask {
    pub task_id:       usize,
    pub task_num:      usize,
    pub start_pack:    PackIndex,
    pub end_pack:      PackIndex,
    pub packs_before:  u64,
    pub tuples_before: u64,
}

impl CTask {
    pub fn pack_count(&self) -> u32 {
        self.end_pack - self.start_pack
    }

    /// 把 `dpns` 覆盖的 pack 按行数尽量均分给 `workers` 个任务。
    /// `dpns` 应是某一快照下的逻辑 pack 列表（见 `ColumnStore::scan_tasks`），任务区间是它的下标。
    /// 未使用的 DPN 计 0 行；任务数不超过 pack 数（无 pack 时返回空）。
    pub fn split(dpns: &[Dpn], workers: usize) -> Vec<CTask> {
        let packs = dpns.len();
        let task_num = workers.max(1).min(packs);
        if task_num == 0 {
            return Vec::new();
        }
        let rows: Vec<u64> = dpns.iter().map(|d| if d.used { d.nr as u64 } else { 0 }).collect();
        let total: u64 = rows.iter().sum();

        let mut tasks = Vec::with_capacity(task_num);
        let mut start = 0usize;
        let mut tuples_before = 0u64;
        for task_id in 0..task_num {
            let remaining_tasks = task_num - task_id;
            let end = if remaining_tasks == 1 {
                packs
            } else {
                // 累计行数达到本任务的目标份额为止，且给后续任务至少各留一个 pack
                let target = total * (task_id as u64 + 1) / task_num as u64;
                let limit = packs - (remaining_tasks - 1);
                let mut end = start + 1;
                let mut acc = tuples_before + rows[start];
                while end < limit && acc < target {
                    acc += rows[end];
                    end += 1;
                }
                end
            };
            tasks.push(CTask {
                task_id,
                task_num,
                start_pack: start as PackIndex,
                end_pack: end as PackIndex,
                packs_before: start as u64,
                tuples_before,
            });
            tuples_before += rows[start..end].iter().sum::<u64>();
            start = end;
        }
        tasks
    }
}
