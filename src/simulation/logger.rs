//! Attribute loggers and their sinks.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::attribute::{AttributeHandle, AttributeValue};
use crate::error::{GridError, Result};
use crate::scheduler::{Task, TaskRef};

/// Receives `(time, attribute name, value)` samples.
pub trait LogSink: Send {
    /// Called once per schedule with the subscribed attribute names.
    fn begin(&mut self, _attributes: &[String]) -> Result<()> {
        Ok(())
    }

    fn record(&mut self, time: f64, attribute: &str, value: &AttributeValue) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One recorded sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub time: f64,
    pub attribute: String,
    pub value: AttributeValue,
}

/// Keeps samples in memory. Clones share the same storage, so a clone kept
/// by the caller sees everything recorded through the logger.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    samples: Arc<Mutex<Vec<Sample>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn storage(&self) -> Result<MutexGuard<'_, Vec<Sample>>> {
        self.samples.lock().map_err(|_| GridError::AttributePoisoned {
            name: "memory sink".to_string(),
        })
    }

    pub fn samples(&self) -> Result<Vec<Sample>> {
        Ok(self.storage()?.clone())
    }

    /// Samples of one attribute in recording order.
    pub fn series(&self, attribute: &str) -> Result<Vec<(f64, AttributeValue)>> {
        Ok(self
            .storage()?
            .iter()
            .filter(|s| s.attribute == attribute)
            .map(|s| (s.time, s.value.clone()))
            .collect())
    }

    /// Real parts of a scalar attribute's samples.
    pub fn real_series(&self, attribute: &str) -> Result<Vec<(f64, f64)>> {
        Ok(self
            .series(attribute)?
            .into_iter()
            .filter_map(|(t, v)| v.as_real().map(|r| (t, r)))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.storage().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogSink for MemorySink {
    fn record(&mut self, time: f64, attribute: &str, value: &AttributeValue) -> Result<()> {
        self.storage()?.push(Sample {
            time,
            attribute: attribute.to_string(),
            value: value.clone(),
        });
        Ok(())
    }
}

/// Writes one `time,attribute,value` CSV record per sample.
pub struct WriterSink<W: Write + Send> {
    name: String,
    writer: csv::Writer<W>,
    header: bool,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(name: &str, writer: W) -> Self {
        Self {
            name: name.to_string(),
            writer: csv::Writer::from_writer(writer),
            header: true,
        }
    }

    pub fn without_header(mut self) -> Self {
        self.header = false;
        self
    }

    /// Flush buffered records and return the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        let name = self.name;
        self.writer.into_inner().map_err(|e| GridError::SinkWrite {
            sink: name,
            source: std::io::Error::new(e.error().kind(), e.error().to_string()),
        })
    }

    fn write_error(&self, source: csv::Error) -> GridError {
        GridError::SinkWrite {
            sink: self.name.clone(),
            source: source.into(),
        }
    }
}

impl<W: Write + Send> LogSink for WriterSink<W> {
    fn begin(&mut self, _attributes: &[String]) -> Result<()> {
        if self.header {
            self.header = false;
            self.writer
                .write_record(["time", "attribute", "value"])
                .map_err(|e| self.write_error(e))?;
        }
        Ok(())
    }

    fn record(&mut self, time: f64, attribute: &str, value: &AttributeValue) -> Result<()> {
        let time = format!("{:.6}", time);
        let value = value.to_string();
        self.writer
            .write_record([time.as_str(), attribute, value.as_str()])
            .map_err(|e| self.write_error(e))
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|source| GridError::SinkWrite {
            sink: self.name.clone(),
            source,
        })
    }
}

type SharedSink = Arc<Mutex<Box<dyn LogSink>>>;

fn lock_sink<'a>(sink: &'a SharedSink, logger: &str) -> Result<MutexGuard<'a, Box<dyn LogSink>>> {
    sink.lock().map_err(|_| GridError::AttributePoisoned {
        name: format!("{} sink", logger),
    })
}

/// Samples subscribed attributes after every solve and forwards them to a
/// sink.
///
/// Attributes are subscribed by name: `"<node>.V"` for node voltages and
/// `"<component>.<attribute>"` for component attributes. Names are resolved
/// against the active topology each time the schedule is built.
pub struct DataLogger {
    name: String,
    subscriptions: Vec<String>,
    down_sampling: u64,
    sink: SharedSink,
}

impl DataLogger {
    pub fn new(name: &str, sink: impl LogSink + 'static) -> Self {
        Self {
            name: name.to_string(),
            subscriptions: Vec::new(),
            down_sampling: 1,
            sink: Arc::new(Mutex::new(Box::new(sink))),
        }
    }

    /// Record only every `n`-th step.
    pub fn with_down_sampling(mut self, n: u64) -> Self {
        self.down_sampling = n.max(1);
        self
    }

    pub fn log_attribute(&mut self, name: &str) -> &mut Self {
        if !self.subscriptions.iter().any(|s| s == name) {
            self.subscriptions.push(name.to_string());
        }
        self
    }

    pub fn with_attribute(mut self, name: &str) -> Self {
        self.log_attribute(name);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    /// Build the logging task against the active topology.
    ///
    /// The task depends on every subscribed attribute and carries the
    /// external sentinel, so it runs after the values it samples and last
    /// within its level.
    pub(crate) fn task(
        &self,
        resolve: impl Fn(&str) -> Result<AttributeHandle>,
    ) -> Result<TaskRef> {
        let handles = self
            .subscriptions
            .iter()
            .map(|name| resolve(name).map(|h| (name.clone(), h)))
            .collect::<Result<Vec<_>>>()?;
        lock_sink(&self.sink, &self.name)?.begin(&self.subscriptions)?;
        debug!(
            "{}: logging {} attributes every {} steps",
            self.name,
            handles.len(),
            self.down_sampling
        );

        let dependencies: Vec<_> = handles.iter().map(|(_, h)| h.reference()).collect();
        let sink = Arc::clone(&self.sink);
        let logger = self.name.clone();
        let down_sampling = self.down_sampling;
        Ok(Task::new(format!("{}.Log", self.name), move |time, step| {
            if step % down_sampling != 0 {
                return Ok(());
            }
            let mut sink = lock_sink(&sink, &logger)?;
            for (name, handle) in &handles {
                sink.record(time, name, &handle.sample()?)?;
            }
            Ok(())
        })
        .with_dependencies(dependencies)
        .with_external_effects()
        .into_ref())
    }

    pub fn flush(&self) -> Result<()> {
        lock_sink(&self.sink, &self.name)?.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AccessFlags, Attribute};
    use num_complex::Complex64;

    #[test]
    fn test_logger_task_samples_subscriptions() {
        let v = Attribute::new("n1.v", 2.5_f64, AccessFlags::READ);
        let sink = MemorySink::new();
        let logger = DataLogger::new("log", sink.clone()).with_attribute("n1.V");
        let handle = AttributeHandle::Real(v.clone());
        let task = logger.task(|_| Ok(handle.clone())).unwrap();
        assert!(task.is_external());
        assert_eq!(task.dependencies()[0], v.reference());

        task.execute(0.1, 1).unwrap();
        v.set(3.0).unwrap();
        task.execute(0.2, 2).unwrap();
        assert_eq!(
            sink.real_series("n1.V").unwrap(),
            vec![(0.1, 2.5), (0.2, 3.0)]
        );
    }

    #[test]
    fn test_unknown_subscription_fails() {
        let logger = DataLogger::new("log", MemorySink::new()).with_attribute("nx.V");
        let err = logger
            .task(|name| {
                Err(GridError::AttributeNotFound {
                    owner: "topology".into(),
                    name: name.into(),
                })
            })
            .unwrap_err();
        assert!(matches!(err, GridError::AttributeNotFound { .. }));
    }

    #[test]
    fn test_down_sampling() {
        let v = Attribute::new("x", Complex64::new(1.0, 1.0), AccessFlags::READ);
        let sink = MemorySink::new();
        let logger = DataLogger::new("log", sink.clone())
            .with_attribute("x")
            .with_down_sampling(2);
        let handle = AttributeHandle::Complex(v);
        let task = logger.task(|_| Ok(handle.clone())).unwrap();
        for step in 0..5 {
            task.execute(step as f64, step).unwrap();
        }
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn test_writer_sink_format() {
        let mut sink = WriterSink::new("csv", Vec::new());
        sink.begin(&["n1.V".to_string()]).unwrap();
        sink.record(0.001, "n1.V", &AttributeValue::Real(1.5)).unwrap();
        sink.flush().unwrap();
        let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        assert!(text.starts_with("time,attribute,value\n0.001000,n1.V,"));
    }

    #[test]
    fn test_writer_sink_quotes_awkward_names() {
        let mut sink = WriterSink::new("csv", Vec::new()).without_header();
        sink.begin(&[]).unwrap();
        sink.record(0.5, "bus 1,a.V", &AttributeValue::Real(2.0)).unwrap();
        sink.record(0.5, "feeder \"x\".V", &AttributeValue::Real(3.0))
            .unwrap();
        let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        assert_eq!(
            text,
            "0.500000,\"bus 1,a.V\",2\n0.500000,\"feeder \"\"x\"\".V\",3\n"
        );

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(text.as_bytes());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "bus 1,a.V");
        assert_eq!(&rows[1][1], "feeder \"x\".V");
    }
}
