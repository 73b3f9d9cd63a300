use std::time::Duration;

/// 事件循环可执行的任务形态：一次性、可跨线程投递的闭包。
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// `EventExecutor` 定义协作式事件循环的调度契约。
///
/// # 设计背景（Why）
/// - 通道的全部生命周期与 I/O 操作都要求“在所属循环上执行”，调用方需要一个
///   统一入口判断自己是否已在循环内（就地执行）或需要移交（`execute`）。
/// - 确定性测试要求循环可以完全没有专属线程，由调用方手动泵送；因此泵送
///   原语是契约的一部分，而非某个实现的私有接口。
///
/// # 契约说明（What）
/// - `execute_dyn`：入队立即任务，不阻塞；同路径提交的任务保持 FIFO；
/// - `schedule_dyn`：入队延时任务，按截止时间有序触发；
/// - `in_event_loop`：当前调用线程是否就是该循环的执行线程；
/// - `run_pending_tasks` / `run_scheduled_tasks`：手动泵送原语。专属线程的
///   生产循环由自己的线程泵送，这两个方法对其返回 0 / `None`；
/// - `run_scheduled_tasks` 返回距下一个截止时间的剩余时长（无则 `None`），
///   调用方据此决定是否继续泵送；
/// - `shutdown`：置停机标志并批量取消未到期的定时任务；已入队的立即任务
///   仍会被执行完毕。
///
/// # 风险提示（Trade-offs）
/// - 任务内 panic 由实现捕获并记录，不会终止循环；但任务的业务性失败必须
///   走各操作自己的完成句柄，不允许跨异步边界抛出。
pub trait EventExecutor: Send + Sync + 'static {
    /// 对象安全的立即任务提交入口。
    fn execute_dyn(&self, task: Task);

    /// 对象安全的延时任务提交入口。
    fn schedule_dyn(&self, delay: Duration, task: Task);

    /// 当前线程是否为该循环的执行线程。
    fn in_event_loop(&self) -> bool;

    /// 是否已进入停机状态。
    fn is_shutdown(&self) -> bool;

    /// 停机：批量取消未到期的定时任务，此后提交的任务被拒绝（静默丢弃并记录）。
    fn shutdown(&self);

    /// 手动泵送全部已入队的立即任务，返回执行数量。
    fn run_pending_tasks(&self) -> usize;

    /// 手动泵送全部到期的定时任务，返回距下一个截止时间的剩余时长。
    fn run_scheduled_tasks(&self) -> Option<Duration>;
}

/// 泛型便捷扩展：免去调用端手动装箱。
///
/// # 逻辑解析（How）
/// - 与教科书式的 `spawn_dyn` + 泛型 `spawn` 双层结构一致：对象安全接口
///   承载类型擦除，扩展 trait 提供日常书写体验。
pub trait EventExecutorExt: EventExecutor {
    /// 提交立即任务。
    fn execute<F: FnOnce() + Send + 'static>(&self, task: F) {
        self.execute_dyn(Box::new(task));
    }

    /// 提交延时任务。
    fn schedule<F: FnOnce() + Send + 'static>(&self, delay: Duration, task: F) {
        self.schedule_dyn(delay, Box::new(task));
    }
}

impl<E: EventExecutor + ?Sized> EventExecutorExt for E {}
