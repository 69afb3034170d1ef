//! 基于工作线程池的 job system
//!
//! 架构:
//! 1. 调用线程通过 `execute` 提交 job，依赖未完成的 job 被挂起。
//! 2. 就绪的 job 直接派发给 rayon 线程池执行。
//! 3. job 完成时递减后继的依赖计数，就绪的后继由工作线程继续派发。
//!
//! 没有取消机制，job 一律运行到结束。

use std::sync::{Arc, Condvar, Mutex};

use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// job 的一代句柄，默认值视为无效句柄
    pub struct JobHandle;
}

/// job 的执行结果
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum JobResult {
    Succeeded,
    Failed,
}

type JobFn = Box<dyn FnOnce() -> JobResult + Send + 'static>;

enum JobState {
    /// 等待依赖完成
    Blocked(JobFn),
    /// 已进入线程池
    Scheduled,
    Finished(JobResult),
}

struct JobEntry {
    state: JobState,
    /// 未完成的依赖数量
    remaining_deps: usize,
    /// 等待本 job 的后继
    dependents: Vec<JobHandle>,
}

#[derive(Default)]
struct JobTable {
    jobs: SlotMap<JobHandle, JobEntry>,
}

struct JobSystemShared {
    table: Mutex<JobTable>,
    finished_signal: Condvar,
    pool: rayon::ThreadPool,
}

/// job system
///
/// # Destroy
///
/// Drop 时等待所有已提交的 job 结束，再关闭线程池。
pub struct JobSystem {
    shared: Arc<JobSystemShared>,
}

// new & init
impl JobSystem {
    pub fn new(worker_count: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(|index| format!("Job-Worker-{index}"))
            .build()
            .expect("Failed to create job worker thread pool");

        Self {
            shared: Arc::new(JobSystemShared {
                table: Mutex::new(JobTable::default()),
                finished_signal: Condvar::new(),
                pool,
            }),
        }
    }

    /// 将一个依赖已就绪的 job 派发给线程池
    ///
    /// 调用时必须持有 table 锁。
    fn schedule_locked(shared: &Arc<JobSystemShared>, table: &mut JobTable, handle: JobHandle) {
        let entry = table.jobs.get_mut(handle).expect("ready job vanished from table");
        let func = match std::mem::replace(&mut entry.state, JobState::Scheduled) {
            JobState::Blocked(func) => func,
            _ => unreachable!("job scheduled twice"),
        };

        let task_shared = shared.clone();
        shared.pool.spawn(move || {
            let result = func();
            Self::finish_job(&task_shared, handle, result);
        });
    }

    fn finish_job(shared: &Arc<JobSystemShared>, handle: JobHandle, result: JobResult) {
        let mut table = shared.table.lock().unwrap();

        let dependents = {
            let entry = table.jobs.get_mut(handle).expect("finished job vanished from table");
            entry.state = JobState::Finished(result);
            std::mem::take(&mut entry.dependents)
        };

        for dependent in dependents {
            let entry = table.jobs.get_mut(dependent).expect("dependent job vanished from table");
            entry.remaining_deps -= 1;
            if entry.remaining_deps == 0 {
                Self::schedule_locked(shared, &mut table, dependent);
            }
        }

        shared.finished_signal.notify_all();
    }
}

// tools
impl JobSystem {
    /// 提交一个 job
    ///
    /// `deps` 中尚未完成的 job 会阻塞本 job 的执行；依赖全部完成后才进入线程池。
    /// 已完成或无效的依赖直接忽略。
    pub fn execute(&self, func: impl FnOnce() -> JobResult + Send + 'static, deps: &[JobHandle]) -> JobHandle {
        let mut table = self.shared.table.lock().unwrap();

        let handle = table.jobs.insert(JobEntry {
            state: JobState::Blocked(Box::new(func)),
            remaining_deps: 0,
            dependents: Vec::new(),
        });

        let mut remaining = 0;
        for &dep in deps {
            match table.jobs.get_mut(dep) {
                Some(entry) if !matches!(entry.state, JobState::Finished(_)) => {
                    entry.dependents.push(handle);
                    remaining += 1;
                }
                _ => {}
            }
        }
        table.jobs[handle].remaining_deps = remaining;

        if remaining == 0 {
            Self::schedule_locked(&self.shared, &mut table, handle);
        }

        handle
    }

    pub fn is_finished(&self, handle: JobHandle) -> bool {
        let table = self.shared.table.lock().unwrap();
        match table.jobs.get(handle) {
            Some(entry) => matches!(entry.state, JobState::Finished(_)),
            // 无效句柄（从未提交过的 job）视为已完成
            None => true,
        }
    }

    /// 阻塞等待某个 job 结束，返回其结果
    pub fn wait(&self, handle: JobHandle) -> JobResult {
        let mut table = self.shared.table.lock().unwrap();
        loop {
            match table.jobs.get(handle) {
                Some(entry) => {
                    if let JobState::Finished(result) = entry.state {
                        return result;
                    }
                }
                None => return JobResult::Succeeded,
            }
            table = self.shared.finished_signal.wait(table).unwrap();
        }
    }

    /// 阻塞等待所有已提交的 job 结束
    pub fn wait_all(&self) {
        let mut table = self.shared.table.lock().unwrap();
        loop {
            let pending = table.jobs.values().any(|e| !matches!(e.state, JobState::Finished(_)));
            if !pending {
                return;
            }
            table = self.shared.finished_signal.wait(table).unwrap();
        }
    }

    /// job 的结果，未完成时返回 None
    pub fn result_of(&self, handle: JobHandle) -> Option<JobResult> {
        let table = self.shared.table.lock().unwrap();
        match table.jobs.get(handle) {
            Some(JobEntry {
                state: JobState::Finished(result),
                ..
            }) => Some(*result),
            _ => None,
        }
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        // 在途 job 仍持有 shared 的引用，线程池随最后一个引用一起关闭
        self.wait_all();
        log::info!("JobSystem dropped, all jobs drained.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_job_runs_to_completion() {
        let jobs = JobSystem::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        let handle = jobs.execute(
            move || {
                c.fetch_add(1, Ordering::SeqCst);
                JobResult::Succeeded
            },
            &[],
        );

        assert_eq!(jobs.wait(handle), JobResult::Succeeded);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(jobs.is_finished(handle));
    }

    #[test]
    fn test_dependency_runs_parent_first() {
        let jobs = JobSystem::new(4);
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        let parent = jobs.execute(
            move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                o.lock().unwrap().push("parent");
                JobResult::Succeeded
            },
            &[],
        );

        let o = order.clone();
        let child = jobs.execute(
            move || {
                o.lock().unwrap().push("child");
                JobResult::Succeeded
            },
            &[parent],
        );

        jobs.wait(child);
        assert_eq!(*order.lock().unwrap(), vec!["parent", "child"]);
    }

    #[test]
    fn test_finished_dependency_is_ignored() {
        let jobs = JobSystem::new(2);
        let parent = jobs.execute(|| JobResult::Succeeded, &[]);
        jobs.wait(parent);

        let child = jobs.execute(|| JobResult::Succeeded, &[parent]);
        assert_eq!(jobs.wait(child), JobResult::Succeeded);
    }

    #[test]
    fn test_invalid_handle_is_finished() {
        let jobs = JobSystem::new(1);
        assert!(jobs.is_finished(JobHandle::default()));
    }

    #[test]
    fn test_failed_result_is_published() {
        let jobs = JobSystem::new(1);
        let handle = jobs.execute(|| JobResult::Failed, &[]);
        assert_eq!(jobs.wait(handle), JobResult::Failed);
        assert_eq!(jobs.result_of(handle), Some(JobResult::Failed));
    }

    #[test]
    fn test_wait_all_drains_chain() {
        let jobs = JobSystem::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        let mut prev = JobHandle::default();
        for _ in 0..8 {
            let c = counter.clone();
            prev = jobs.execute(
                move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    JobResult::Succeeded
                },
                &[prev],
            );
        }

        jobs.wait_all();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }
}
