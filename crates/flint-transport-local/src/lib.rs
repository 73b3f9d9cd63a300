#![deny(unsafe_code)]
#![doc = "flint 本地传输：进程内通道配对，无套接字地模拟可靠有序全双工流。"]
#![doc = ""]
#![doc = "== 定位 =="]
#![doc = "面向进程内组网与端到端协议栈测试：连接端经进程级注册表找到监听端，"]
#![doc = "由监听端衍生子通道配对；消息作为语言级对象在内存队列间流转，"]
#![doc = "不存在线缆字节格式。"]
#![doc = ""]
#![doc = "== 次序承诺 =="]
#![doc = "单通道写入按提交顺序完成；对端按发送顺序观察消息——“触发对端排空”"]
#![doc = "永远经对端自己的事件循环 FIFO 投递，不与先前的排空任务乱序。"]

mod channel;
mod error;
mod listener;
mod registry;

pub use channel::LocalChannel;
pub use listener::LocalServerChannel;
