use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ClassLabel {
    pub label: String,
    pub red: u32,
    pub green: u32,
    pub blue: u32,
}

impl ClassLabel {
    pub fn unknown(class_id: u32) -> Self {
        Self {
            label: format!("Unknown class {}", class_id),
            red: 0,
            green: 0,
            blue: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClassLabels {
    labels: Vec<ClassLabel>,
}

impl ClassLabels {
    pub fn load(filepath: &Path) -> io::Result<Self> {
        let file = File::open(filepath)?;
        Self::from_reader(io::BufReader::new(file))
    }

    /// Parses one `label,red,green,blue` entry per line.
    pub fn from_reader(reader: impl BufRead) -> io::Result<Self> {
        let mut labels = Vec::new();

        for line_result in reader.lines() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split(',').collect();

            if parts.len() != 4 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Invalid line format: {}", line),
                ));
            }

            labels.push(ClassLabel {
                label: parts[0].trim().to_string(),
                red: parse_channel(parts[1], "red")?,
                green: parse_channel(parts[2], "green")?,
                blue: parse_channel(parts[3], "blue")?,
            });
        }

        Ok(Self { labels })
    }

    pub fn get(&self, class_id: u32) -> Option<&ClassLabel> {
        self.labels.get(class_id as usize)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

fn parse_channel(value: &str, channel: &str) -> io::Result<u32> {
    value.trim().parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid {} value", channel),
        )
    })
}
