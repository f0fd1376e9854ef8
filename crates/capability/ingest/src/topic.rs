//! 主题路由：`{prefix}/devices|gateways/{id}/telemetry|status`。

/// 消息类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Telemetry,
    Status,
}

/// 主题解析结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRoute {
    pub kind: TopicKind,
    /// 设备主题中的设备标识。
    pub device_hint: Option<String>,
    /// 网关主题中的网关标识。
    pub gateway_id: Option<String>,
}

impl TopicRoute {
    fn payload_only() -> Self {
        Self {
            kind: TopicKind::Telemetry,
            device_hint: None,
            gateway_id: None,
        }
    }
}

/// 解析主题；不符合约定结构的主题按遥测处理，设备身份只取自报文。
pub fn route_topic(prefix: &str, topic: &str) -> TopicRoute {
    let prefix = prefix.trim_matches('/');
    let topic = topic.trim_matches('/');
    let rest = if prefix.is_empty() {
        Some(topic)
    } else {
        topic
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
    };
    let Some(rest) = rest else {
        return TopicRoute::payload_only();
    };
    let parts: Vec<&str> = rest.split('/').collect();
    let [scope, id, channel] = parts.as_slice() else {
        return TopicRoute::payload_only();
    };
    if id.is_empty() {
        return TopicRoute::payload_only();
    }
    let kind = match *channel {
        "telemetry" => TopicKind::Telemetry,
        "status" => TopicKind::Status,
        _ => return TopicRoute::payload_only(),
    };
    match *scope {
        "devices" => TopicRoute {
            kind,
            device_hint: Some(id.to_string()),
            gateway_id: None,
        },
        "gateways" => TopicRoute {
            kind,
            device_hint: None,
            gateway_id: Some(id.to_string()),
        },
        _ => TopicRoute::payload_only(),
    }
}
