mod buffers;
mod dispatch;
mod programs;
mod queue;
