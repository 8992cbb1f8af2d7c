//! Static catalog of every VRM operation exposed as a tool.
//!
//! Each [`ToolSpec`] couples the closed argument schema with the remote path
//! template and the dispatch behavior. The table is immutable and auditable:
//! adding an operation means adding one entry here and, if its path is new,
//! one allowlist entry in the runtime.

use serde_json::{Map, Value, json};

pub const STATS_TYPES: &[&str] = &[
    "venus",
    "live_feed",
    "consumption",
    "kwh",
    "solar_yield",
    "forecast",
];
pub const STATS_INTERVALS: &[&str] = &[
    "15mins", "hours", "2hours", "days", "weeks", "months", "years",
];
pub const PERIOD_TYPES: &[&str] = &["custom", "today", "yesterday", "month", "year"];
pub const DOWNLOAD_FORMATS: &[&str] = &["csv", "xlsx", "xls", "json"];
pub const DOWNLOAD_DATATYPES: &[&str] = &["log", "kwh"];

pub const DEFAULT_STATS_INTERVAL: &str = "15mins";
pub const DEFAULT_DIAGNOSTICS_COUNT: i64 = 200;
pub const DEFAULT_DOWNLOAD_DATATYPE: &str = "log";
pub const DEFAULT_DOWNLOAD_FORMAT: &str = "csv";

/// Widgets reachable under `/installations/{siteId}/widgets/<name>`.
pub const WIDGETS: &[&str] = &[
    "Graph",
    "BatterySummary",
    "BMSDiagnostics",
    "HistoricData",
    "IOExtenderInOut",
    "LithiumBMS",
    "DCMeter",
    "EvChargerSummary",
    "GeneratorState",
    "GlobalLinkSummary",
    "InputState",
    "MotorSummary",
    "PVInverterStatus",
    "SolarChargerSummary",
    "Status",
    "TankSummary",
    "TempSummary",
    "VeBusState",
    "VeBusWarningsAndAlarms",
    "ChargerRelayState",
    "SolarChargerRelayState",
    "InverterChargerState",
    "InverterChargerWarningsAndAlarms",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer { min: Option<i64>, max: Option<i64> },
    Text { allowed: Option<&'static [&'static str]> },
    Boolean,
    TextList { min_items: usize },
}

/// Where a validated field ends up on the outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    /// Substituted into the path template
    Path,
    /// Emitted as a query parameter under `wire`
    Query,
    /// Consumed by the dispatcher, never sent
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Integer(i64),
    Text(&'static str),
    Boolean(bool),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub wire: &'static str,
    pub description: &'static str,
    pub kind: FieldKind,
    pub role: FieldRole,
    pub required: bool,
    pub default: Option<DefaultValue>,
}

impl FieldSpec {
    const fn base(name: &'static str, kind: FieldKind, description: &'static str) -> Self {
        Self {
            name,
            wire: name,
            description,
            kind,
            role: FieldRole::Query,
            required: false,
            default: None,
        }
    }

    pub const fn integer(name: &'static str, description: &'static str) -> Self {
        Self::base(
            name,
            FieldKind::Integer {
                min: None,
                max: None,
            },
            description,
        )
    }

    pub const fn text(name: &'static str, description: &'static str) -> Self {
        Self::base(name, FieldKind::Text { allowed: None }, description)
    }

    pub const fn one_of(
        name: &'static str,
        allowed: &'static [&'static str],
        description: &'static str,
    ) -> Self {
        Self::base(
            name,
            FieldKind::Text {
                allowed: Some(allowed),
            },
            description,
        )
    }

    pub const fn boolean(name: &'static str, description: &'static str) -> Self {
        Self::base(name, FieldKind::Boolean, description)
    }

    /// String array that must carry at least one element.
    pub const fn text_list(name: &'static str, description: &'static str) -> Self {
        Self::base(name, FieldKind::TextList { min_items: 1 }, description)
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn path(mut self) -> Self {
        self.role = FieldRole::Path;
        self
    }

    pub const fn local(mut self) -> Self {
        self.role = FieldRole::Local;
        self
    }

    pub const fn wire(mut self, wire: &'static str) -> Self {
        self.wire = wire;
        self
    }

    pub const fn range(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        if let FieldKind::Integer { .. } = self.kind {
            self.kind = FieldKind::Integer { min, max };
        }
        self
    }

    pub const fn min(self, min: i64) -> Self {
        self.range(Some(min), None)
    }

    pub const fn default(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }

    fn schema(&self) -> Value {
        let mut schema = match self.kind {
            FieldKind::Integer { min, max } => {
                let mut s = json!({ "type": "integer" });
                if let Some(min) = min {
                    s["minimum"] = json!(min);
                }
                if let Some(max) = max {
                    s["maximum"] = json!(max);
                }
                s
            }
            FieldKind::Text { allowed } => {
                let mut s = json!({ "type": "string" });
                if let Some(allowed) = allowed {
                    s["enum"] = json!(allowed);
                }
                s
            }
            FieldKind::Boolean => json!({ "type": "boolean" }),
            FieldKind::TextList { min_items } => json!({
                "type": "array",
                "items": { "type": "string" },
                "minItems": min_items
            }),
        };
        schema["description"] = Value::String(self.description.to_string());
        match self.default {
            Some(DefaultValue::Integer(v)) => schema["default"] = json!(v),
            Some(DefaultValue::Text(v)) => schema["default"] = json!(v),
            Some(DefaultValue::Boolean(v)) => schema["default"] = json!(v),
            None => {}
        }
        schema
    }
}

/// Remote path template of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    CurrentUser,
    UserInstallations,
    UserSearch,
    /// `/installations/{siteId}/<sub>`
    Installation(&'static str),
    /// `/installations/{siteId}/widgets/<name>`
    Widget(&'static str),
    /// Literal path with no identifiers
    Global(&'static str),
}

impl Endpoint {
    pub fn template(&self) -> String {
        match self {
            Endpoint::CurrentUser => "/users/me".to_string(),
            Endpoint::UserInstallations => "/users/{userId}/installations".to_string(),
            Endpoint::UserSearch => "/users/{userId}/search".to_string(),
            Endpoint::Installation(sub) => format!("/installations/{{siteId}}/{sub}"),
            Endpoint::Widget(name) => format!("/installations/{{siteId}}/widgets/{name}"),
            Endpoint::Global(path) => (*path).to_string(),
        }
    }

    /// Substitute identifiers. `None` when a needed identifier is missing.
    pub fn resolve(&self, site_id: Option<i64>, user_id: Option<i64>) -> Option<String> {
        match self {
            Endpoint::CurrentUser => Some("/users/me".to_string()),
            Endpoint::UserInstallations => user_id.map(|id| format!("/users/{id}/installations")),
            Endpoint::UserSearch => user_id.map(|id| format!("/users/{id}/search")),
            Endpoint::Installation(sub) => site_id.map(|id| format!("/installations/{id}/{sub}")),
            Endpoint::Widget(name) => {
                site_id.map(|id| format!("/installations/{id}/widgets/{name}"))
            }
            Endpoint::Global(path) => Some((*path).to_string()),
        }
    }
}

/// Post-processing and call shape beyond a single plain GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Plain,
    /// Resolve the current user first when `userId` is omitted
    InstallationsListing,
    /// Period totals: bounds only for custom periods, timezone advisory otherwise
    PeriodTotals,
    /// Advise alternatives when the graph comes back empty
    GraphWidget,
    /// Base64 download, decoded and parsed when it is CSV
    DataDownload,
}

#[derive(Debug)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub endpoint: Endpoint,
    pub behavior: Behavior,
    pub fields: &'static [FieldSpec],
}

impl ToolSpec {
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in self.fields {
            properties.insert(field.name.to_string(), field.schema());
            if field.required {
                required.push(Value::String(field.name.to_string()));
            }
        }
        let mut schema = json!({
            "type": "object",
            "properties": properties,
            "additionalProperties": false
        });
        if !required.is_empty() {
            schema["required"] = Value::Array(required);
        }
        schema
    }
}

const SITE_ID: FieldSpec = FieldSpec::integer("siteId", "VRM installation id (idSite)")
    .min(1)
    .required()
    .path();
const START: FieldSpec = FieldSpec::integer("start", "Range start, epoch seconds").min(0);
const END: FieldSpec = FieldSpec::integer("end", "Range end, epoch seconds").min(0);
const ATTRIBUTE_CODES: FieldSpec = FieldSpec::text_list(
    "attributeCodes",
    "Attribute codes to include (see vrm_get_data_attributes)",
)
.wire("attributeCodes[]");
const INSTANCE: FieldSpec = FieldSpec::integer("instance", "Device instance").min(0);

const NO_FIELDS: &[FieldSpec] = &[];
const SITE_ONLY: &[FieldSpec] = &[SITE_ID];
const WIDGET_FIELDS: &[FieldSpec] = &[SITE_ID, INSTANCE, START, END];

const LIST_INSTALLATIONS_FIELDS: &[FieldSpec] = &[
    FieldSpec::integer(
        "userId",
        "Owning user id; resolved from the token's user when omitted",
    )
    .min(1)
    .path(),
    FieldSpec::integer("siteId", "Only return this installation")
        .min(1)
        .wire("idSite"),
    FieldSpec::boolean("extended", "Include extended installation details"),
];

const SEARCH_FIELDS: &[FieldSpec] = &[
    FieldSpec::integer("userId", "Owning user id")
        .min(1)
        .required()
        .path(),
    FieldSpec::text("query", "Search text").required(),
    FieldSpec::integer("limit", "Maximum number of results").range(Some(1), Some(100)),
];

const STATS_FIELDS: &[FieldSpec] = &[
    SITE_ID,
    FieldSpec::one_of("type", STATS_TYPES, "Kind of statistics").required(),
    FieldSpec::one_of("interval", STATS_INTERVALS, "Aggregation interval")
        .default(DefaultValue::Text(DEFAULT_STATS_INTERVAL)),
    START,
    END,
    ATTRIBUTE_CODES,
];

const OVERALL_STATS_FIELDS: &[FieldSpec] = &[
    SITE_ID,
    FieldSpec::one_of(
        "type",
        PERIOD_TYPES,
        "Period; start/end are only used with custom",
    )
    .required(),
    START,
    END,
    ATTRIBUTE_CODES,
];

const ALARMS_FIELDS: &[FieldSpec] = &[
    SITE_ID,
    FieldSpec::integer("page", "Page number").min(1),
    FieldSpec::integer("pageSize", "Alarms per page").range(Some(1), Some(200)),
];

const DIAGNOSTICS_FIELDS: &[FieldSpec] = &[
    SITE_ID,
    FieldSpec::integer("count", "Number of diagnostic entries")
        .range(Some(1), Some(1000))
        .default(DefaultValue::Integer(DEFAULT_DIAGNOSTICS_COUNT)),
    FieldSpec::integer("offset", "Entries to skip").min(0),
];

const CUSTOM_WIDGET_FIELDS: &[FieldSpec] = &[
    SITE_ID,
    FieldSpec::integer("widgetId", "Custom widget id").min(1),
];

const DATA_DOWNLOAD_FIELDS: &[FieldSpec] = &[
    SITE_ID,
    FieldSpec::one_of("datatype", DOWNLOAD_DATATYPES, "Dataset to export")
        .default(DefaultValue::Text(DEFAULT_DOWNLOAD_DATATYPE)),
    FieldSpec::one_of("format", DOWNLOAD_FORMATS, "Export file format")
        .default(DefaultValue::Text(DEFAULT_DOWNLOAD_FORMAT)),
    FieldSpec::integer("start", "Range start, epoch milliseconds").min(0),
    FieldSpec::integer("end", "Range end, epoch milliseconds").min(0),
    FieldSpec::boolean("decode", "Decode and parse CSV exports into records")
        .local()
        .default(DefaultValue::Boolean(true)),
];

const GPS_DOWNLOAD_FIELDS: &[FieldSpec] = &[SITE_ID, START, END];

const GRAPH_FIELDS: &[FieldSpec] = &[
    SITE_ID,
    ATTRIBUTE_CODES.required(),
    INSTANCE,
    START,
    END,
];

const fn tool(
    name: &'static str,
    description: &'static str,
    endpoint: Endpoint,
    fields: &'static [FieldSpec],
) -> ToolSpec {
    ToolSpec {
        name,
        description,
        endpoint,
        behavior: Behavior::Plain,
        fields,
    }
}

const fn widget(name: &'static str, widget: &'static str, description: &'static str) -> ToolSpec {
    tool(name, description, Endpoint::Widget(widget), WIDGET_FIELDS)
}

pub static TOOLS: &[ToolSpec] = &[
    tool(
        "vrm_get_user_me",
        "Current VRM user for the configured token.",
        Endpoint::CurrentUser,
        NO_FIELDS,
    ),
    ToolSpec {
        behavior: Behavior::InstallationsListing,
        ..tool(
            "vrm_list_installations",
            "List installations of a user (defaults to the token's user).",
            Endpoint::UserInstallations,
            LIST_INSTALLATIONS_FIELDS,
        )
    },
    tool(
        "vrm_search_installations",
        "Search a user's installations by name or identifier.",
        Endpoint::UserSearch,
        SEARCH_FIELDS,
    ),
    tool(
        "vrm_get_system_overview",
        "Devices connected to an installation.",
        Endpoint::Installation("system-overview"),
        SITE_ONLY,
    ),
    tool(
        "vrm_get_stats",
        "Time series statistics for an installation.",
        Endpoint::Installation("stats"),
        STATS_FIELDS,
    ),
    ToolSpec {
        behavior: Behavior::PeriodTotals,
        ..tool(
            "vrm_get_overall_stats",
            "Aggregated totals for today, yesterday, this month, this year or a custom range.",
            Endpoint::Installation("overallstats"),
            OVERALL_STATS_FIELDS,
        )
    },
    tool(
        "vrm_get_alarms",
        "Alarms configured and raised on an installation.",
        Endpoint::Installation("alarms"),
        ALARMS_FIELDS,
    ),
    tool(
        "vrm_get_diagnostics",
        "Latest diagnostic values of every device on an installation.",
        Endpoint::Installation("diagnostics"),
        DIAGNOSTICS_FIELDS,
    ),
    tool(
        "vrm_get_tags",
        "Tags attached to an installation.",
        Endpoint::Installation("tags"),
        SITE_ONLY,
    ),
    tool(
        "vrm_get_custom_widget",
        "Custom widgets defined for an installation.",
        Endpoint::Installation("custom-widget"),
        CUSTOM_WIDGET_FIELDS,
    ),
    tool(
        "vrm_get_dynamic_ess_settings",
        "Dynamic ESS configuration of an installation.",
        Endpoint::Installation("dynamic-ess-settings"),
        SITE_ONLY,
    ),
    tool(
        "vrm_get_reset_forecasts",
        "Last forecast reset information for an installation.",
        Endpoint::Installation("reset-forecasts"),
        SITE_ONLY,
    ),
    ToolSpec {
        behavior: Behavior::DataDownload,
        ..tool(
            "vrm_download_data",
            "Export logged data; CSV exports are decoded into records by default.",
            Endpoint::Installation("data-download"),
            DATA_DOWNLOAD_FIELDS,
        )
    },
    tool(
        "vrm_download_gps",
        "Export GPS tracks of an installation.",
        Endpoint::Installation("gps-download"),
        GPS_DOWNLOAD_FIELDS,
    ),
    tool(
        "vrm_get_data_attributes",
        "Catalog of attribute codes usable in stats and graph queries.",
        Endpoint::Global("/data-attributes"),
        NO_FIELDS,
    ),
    tool(
        "vrm_get_firmwares",
        "Available firmware versions.",
        Endpoint::Global("/firmwares"),
        NO_FIELDS,
    ),
    tool(
        "vrm_demo_login",
        "Obtain a session for the public demo account.",
        Endpoint::Global("/auth/loginAsDemo"),
        NO_FIELDS,
    ),
    tool(
        "vrm_logout",
        "Invalidate the current session token.",
        Endpoint::Global("/auth/logout"),
        NO_FIELDS,
    ),
    ToolSpec {
        behavior: Behavior::GraphWidget,
        ..tool(
            "vrm_widget_graph",
            "Graph widget data for the given attribute codes.",
            Endpoint::Widget("Graph"),
            GRAPH_FIELDS,
        )
    },
    widget(
        "vrm_widget_battery_summary",
        "BatterySummary",
        "Battery summary widget.",
    ),
    widget(
        "vrm_widget_bms_diagnostics",
        "BMSDiagnostics",
        "BMS diagnostics widget.",
    ),
    widget(
        "vrm_widget_historic_data",
        "HistoricData",
        "Historic battery data widget.",
    ),
    widget(
        "vrm_widget_io_extender_in_out",
        "IOExtenderInOut",
        "IO extender inputs and outputs widget.",
    ),
    widget(
        "vrm_widget_lithium_bms",
        "LithiumBMS",
        "Lithium BMS widget.",
    ),
    widget("vrm_widget_dc_meter", "DCMeter", "DC meter widget."),
    widget(
        "vrm_widget_ev_charger_summary",
        "EvChargerSummary",
        "EV charger summary widget.",
    ),
    widget(
        "vrm_widget_generator_state",
        "GeneratorState",
        "Generator state widget.",
    ),
    widget(
        "vrm_widget_global_link_summary",
        "GlobalLinkSummary",
        "GlobalLink summary widget.",
    ),
    widget("vrm_widget_input_state", "InputState", "Digital input state widget."),
    widget(
        "vrm_widget_motor_summary",
        "MotorSummary",
        "Motor drive summary widget.",
    ),
    widget(
        "vrm_widget_pv_inverter_status",
        "PVInverterStatus",
        "PV inverter status widget.",
    ),
    widget(
        "vrm_widget_solar_charger_summary",
        "SolarChargerSummary",
        "Solar charger summary widget.",
    ),
    widget("vrm_widget_status", "Status", "Installation status widget."),
    widget(
        "vrm_widget_tank_summary",
        "TankSummary",
        "Tank levels widget.",
    ),
    widget(
        "vrm_widget_temp_summary",
        "TempSummary",
        "Temperature sensors widget.",
    ),
    widget("vrm_widget_ve_bus_state", "VeBusState", "VE.Bus state widget."),
    widget(
        "vrm_widget_ve_bus_warnings_and_alarms",
        "VeBusWarningsAndAlarms",
        "VE.Bus warnings and alarms widget.",
    ),
    widget(
        "vrm_widget_charger_relay_state",
        "ChargerRelayState",
        "Charger relay state widget.",
    ),
    widget(
        "vrm_widget_solar_charger_relay_state",
        "SolarChargerRelayState",
        "Solar charger relay state widget.",
    ),
    widget(
        "vrm_widget_inverter_charger_state",
        "InverterChargerState",
        "Inverter/charger state widget.",
    ),
    widget(
        "vrm_widget_inverter_charger_warnings_and_alarms",
        "InverterChargerWarningsAndAlarms",
        "Inverter/charger warnings and alarms widget.",
    ),
];

pub fn find_tool(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|tool| tool.name == name)
}
